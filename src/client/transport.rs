//! Transport selection and connection establishment.
//!
//! The endpoint URI decides how bytes reach the runtime:
//!
//! | Scheme | Transport | Base URI |
//! |--------|-----------|----------|
//! | `tcp`, `http` | TCP, or TLS when credentials carry TLS material | `http(s)://host:port/` |
//! | `https` | TLS over TCP | `https://host:port/` |
//! | `unix` | Unix domain socket at the URI path | `http://localhost/` |
//! | `npipe` | Windows named pipe `\\server\pipe\name` | `http://localhost/` |
//!
//! Selection happens once, when the client is built. [`EngineConnector`] then opens
//! connections for both the pooled HTTP client and dedicated hijack connections.

use crate::client::config::Credentials;
use crate::error::{EngineError, Result};
use crate::protocol::LOCAL_BASE_URI;
use http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use url::Url;

/// How connections to the endpoint are made.
#[derive(Clone)]
pub enum Transport {
    /// Plain TCP.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
    },
    /// TLS over TCP.
    Tls {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
        /// Name presented for SNI and certificate verification.
        server_name: ServerName<'static>,
        /// Connector built from the credentials' rustls configuration.
        connector: TlsConnector,
    },
    /// Unix domain socket.
    Unix(PathBuf),
    /// Windows named pipe.
    NamedPipe {
        /// Full pipe path, e.g. `\\.\pipe\docker_engine`.
        path: String,
        /// Upper bound on retries while the pipe is busy.
        connect_timeout: Duration,
    },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp { host, port } => write!(f, "Tcp({host}:{port})"),
            Transport::Tls { host, port, .. } => write!(f, "Tls({host}:{port})"),
            Transport::Unix(path) => write!(f, "Unix({})", path.display()),
            Transport::NamedPipe { path, .. } => write!(f, "NamedPipe({path})"),
        }
    }
}

/// What a selected transport can do beyond plain request/response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Connections can be upgraded into hijacked streams.
    pub hijack: bool,
    /// The write half of a hijacked stream can be closed on its own.
    pub half_close: bool,
}

/// Result of [`select`].
#[derive(Debug, Clone)]
pub struct TransportSelection {
    /// Connection strategy.
    pub transport: Transport,
    /// Base URI for request URIs, ending in `/`.
    pub base_uri: String,
    /// Capabilities of the transport.
    pub capabilities: TransportCapabilities,
}

/// Pick the transport for `endpoint`.
///
/// # Errors
///
/// - [`EngineError::UnsupportedScheme`] for unknown schemes
/// - [`EngineError::MalformedEndpoint`] for URIs that do not fit their scheme
/// - [`EngineError::UnsupportedTransport`] for TLS over named pipes, or `https` without TLS
///
/// # Examples
///
/// ```
/// use dockhand::client::select;
/// use dockhand::Credentials;
/// use std::time::Duration;
///
/// let selection = select(
///     "tcp://127.0.0.1:2375",
///     &Credentials::Anonymous,
///     Duration::from_millis(100),
/// )
/// .unwrap();
/// assert_eq!(selection.base_uri, "http://127.0.0.1:2375/");
/// assert!(selection.capabilities.half_close);
/// ```
pub fn select(
    endpoint: &str,
    credentials: &Credentials,
    named_pipe_connect_timeout: Duration,
) -> Result<TransportSelection> {
    let url = Url::parse(endpoint).map_err(|err| malformed(endpoint, err.to_string()))?;

    let selection = match url.scheme() {
        "tcp" | "http" => {
            if credentials.is_tls() {
                select_tls(endpoint, &url, credentials)?
            } else {
                select_tcp(endpoint, &url)?
            }
        }
        "https" => select_tls(endpoint, &url, credentials)?,
        "unix" => select_unix(endpoint, &url)?,
        "npipe" => select_named_pipe(endpoint, &url, credentials, named_pipe_connect_timeout)?,
        other => return Err(EngineError::UnsupportedScheme(other.to_string())),
    };

    tracing::debug!(
        "selected transport {:?} for {} (base {})",
        selection.transport,
        endpoint,
        selection.base_uri
    );
    Ok(selection)
}

fn malformed(endpoint: &str, reason: impl Into<String>) -> EngineError {
    EngineError::MalformedEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.into(),
    }
}

fn network_address(endpoint: &str, url: &Url, default_port: u16) -> Result<(String, u16, String)> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| malformed(endpoint, "missing host"))?
        .to_string();
    let port = url.port().unwrap_or(default_port);

    let mut prefix = url.path().to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    Ok((host, port, prefix))
}

fn select_tcp(endpoint: &str, url: &Url) -> Result<TransportSelection> {
    let (host, port, prefix) = network_address(endpoint, url, 80)?;
    Ok(TransportSelection {
        base_uri: format!("http://{host}:{port}{prefix}"),
        transport: Transport::Tcp { host, port },
        capabilities: TransportCapabilities {
            hijack: true,
            half_close: true,
        },
    })
}

fn select_tls(endpoint: &str, url: &Url, credentials: &Credentials) -> Result<TransportSelection> {
    let tls = credentials.tls().ok_or_else(|| {
        EngineError::UnsupportedTransport(format!("{endpoint} requires TLS credentials"))
    })?;
    let (host, port, prefix) = network_address(endpoint, url, 443)?;

    let bare_host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let server_name = ServerName::try_from(bare_host)
        .map_err(|err| malformed(endpoint, format!("invalid TLS server name: {err}")))?;

    Ok(TransportSelection {
        base_uri: format!("https://{host}:{port}{prefix}"),
        transport: Transport::Tls {
            host,
            port,
            server_name,
            connector: TlsConnector::from(tls.config()),
        },
        capabilities: TransportCapabilities {
            hijack: true,
            half_close: true,
        },
    })
}

fn select_unix(endpoint: &str, url: &Url) -> Result<TransportSelection> {
    let path = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(|err| malformed(endpoint, format!("socket path is not UTF-8: {err}")))?;
    if path.is_empty() {
        return Err(malformed(endpoint, "missing socket path"));
    }

    Ok(TransportSelection {
        transport: Transport::Unix(PathBuf::from(path.as_ref())),
        base_uri: LOCAL_BASE_URI.to_string(),
        capabilities: TransportCapabilities {
            hijack: true,
            half_close: true,
        },
    })
}

fn select_named_pipe(
    endpoint: &str,
    url: &Url,
    credentials: &Credentials,
    connect_timeout: Duration,
) -> Result<TransportSelection> {
    if credentials.is_tls() {
        return Err(EngineError::UnsupportedTransport(
            "TLS is not supported over named pipes".into(),
        ));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.collect())
        .unwrap_or_default();
    let name = match segments.as_slice() {
        [pipe, name] if pipe.eq_ignore_ascii_case("pipe") && !name.is_empty() => *name,
        _ => return Err(malformed(endpoint, "expected npipe://<server>/pipe/<name>")),
    };

    let server = match url.host_str() {
        None | Some("") => ".",
        Some(host) if host.eq_ignore_ascii_case("localhost") => ".",
        Some(host) => host,
    };

    Ok(TransportSelection {
        transport: Transport::NamedPipe {
            path: format!(r"\\{server}\pipe\{name}"),
            connect_timeout,
        },
        base_uri: LOCAL_BASE_URI.to_string(),
        capabilities: TransportCapabilities {
            hijack: true,
            half_close: false,
        },
    })
}

impl Transport {
    /// Open a new connection.
    pub async fn connect(&self) -> io::Result<EngineIo> {
        let stream = match self {
            Transport::Tcp { host, port } => Stream::Tcp(connect_tcp(host, *port).await?),
            Transport::Tls {
                host,
                port,
                server_name,
                connector,
            } => {
                let tcp = connect_tcp(host, *port).await?;
                let tls = connector.connect(server_name.clone(), tcp).await?;
                Stream::Tls(Box::new(tls))
            }
            Transport::Unix(path) => connect_unix(path).await?,
            Transport::NamedPipe {
                path,
                connect_timeout,
            } => connect_named_pipe(path, *connect_timeout).await?,
        };
        Ok(EngineIo::new(stream))
    }
}

async fn connect_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> io::Result<Stream> {
    Ok(Stream::Unix(tokio::net::UnixStream::connect(path).await?))
}

#[cfg(not(unix))]
async fn connect_unix(path: &std::path::Path) -> io::Result<Stream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unix sockets are not available on this platform: {}", path.display()),
    ))
}

#[cfg(windows)]
async fn connect_named_pipe(path: &str, connect_timeout: Duration) -> io::Result<Stream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;
    let deadline = tokio::time::Instant::now() + connect_timeout;

    loop {
        match ClientOptions::new().open(path) {
            Ok(client) => return Ok(Stream::Pipe(client)),
            Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("named pipe {path} stayed busy for {connect_timeout:?}"),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(not(windows))]
async fn connect_named_pipe(path: &str, _connect_timeout: Duration) -> io::Result<Stream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("named pipes are not available on this platform: {path}"),
    ))
}

/// Connector shared by the pooled client and hijack connections.
#[derive(Clone, Debug)]
pub struct EngineConnector {
    transport: Arc<Transport>,
}

impl EngineConnector {
    /// Connector for `transport`.
    pub fn new(transport: Transport) -> Self {
        EngineConnector {
            transport: Arc::new(transport),
        }
    }

    /// The transport connections are opened with.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl tower::Service<Uri> for EngineConnector {
    type Response = EngineIo;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<EngineIo>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        // The endpoint, not the request URI, decides where to connect.
        let transport = self.transport.clone();
        Box::pin(async move { transport.connect().await })
    }
}

/// Byte stream of any transport.
pub(crate) enum Stream {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    Pipe(tokio::net::windows::named_pipe::NamedPipeClient),
}

macro_rules! delegate {
    ($self:ident, $stream:ident => $call:expr) => {
        match $self.get_mut() {
            Stream::Tcp($stream) => $call,
            Stream::Tls($stream) => $call,
            #[cfg(unix)]
            Stream::Unix($stream) => $call,
            #[cfg(windows)]
            Stream::Pipe($stream) => $call,
        }
    };
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_read(cx, buf))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_shutdown(cx))
    }
}

/// Connection handed to hyper.
pub struct EngineIo {
    inner: TokioIo<Stream>,
}

impl EngineIo {
    pub(crate) fn new(stream: Stream) -> Self {
        EngineIo {
            inner: TokioIo::new(stream),
        }
    }
}

impl Connection for EngineIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for EngineIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl hyper::rt::Write for EngineIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
