//! Request dispatch.
//!
//! [`EngineClient`] turns an [`ApiRequest`] into one of four response shapes. Every shape goes
//! through the same steps:
//!
//! 1. Build the URI (`v<version>/` prefix, query string) and headers; reject empty paths
//!    before any I/O
//! 2. Send over the transport selected at construction, racing the request's cancellation
//!    token and timeout
//! 3. Run the error handlers before the body reaches the caller
//! 4. Return the buffered text, the open body, the open response or the hijacked connection
//!
//! # Examples
//!
//! ## Buffered request
//!
//! ```ignore
//! use dockhand::{ApiRequest, EngineClient, EndpointConfig, ResourceKind};
//! use dockhand::client::NotFoundHandler;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EngineClient::new(EndpointConfig::default())?;
//!     let not_found = NotFoundHandler::new(ResourceKind::Container);
//!
//!     let response = client
//!         .request(ApiRequest::get("containers/web/json"), &[&not_found])
//!         .await?;
//!     println!("{}", response.body);
//!     Ok(())
//! }
//! ```
//!
//! ## Following an event stream
//!
//! ```ignore
//! use dockhand::{ApiRequest, EngineClient, EndpointConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EngineClient::new(EndpointConfig::default())?;
//!     let cancel = CancellationToken::new();
//!     let request = ApiRequest::get("events").with_cancellation(cancel.clone());
//!
//!     client
//!         .monitor_json::<serde_json::Value, _, _>(request, &[], |event| async move {
//!             println!("{event}");
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

use crate::client::config::EndpointConfig;
use crate::client::hijack::HijackedStream;
use crate::client::interceptor::{intercept, ErrorHandler};
use crate::client::stream::{self, DecodedStream};
use crate::client::transport::{self, EngineConnector, TransportCapabilities};
use crate::client::utils::{ensure_upgrade_headers, is_upgrade_status, origin_form};
use crate::error::{EngineError, Result};
use crate::protocol::{build_uri, ConverterRegistry, USER_AGENT};
use crate::types::{
    empty_body, ApiRequest, ApiResponse, DispatchOutcome, OutgoingBody, ResponseBody,
    ResponseMode, StreamedResponse, Timeout,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT as USER_AGENT_HEADER};
use http::{HeaderMap, HeaderValue, Request, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Response;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Client for a container runtime API.
///
/// Cheap to clone; clones share the connection pool and converter registry.
#[derive(Clone)]
pub struct EngineClient {
    http: Client<EngineConnector, OutgoingBody>,
    connector: EngineConnector,
    base_uri: Arc<str>,
    capabilities: TransportCapabilities,
    config: Arc<EndpointConfig>,
    converters: Arc<ConverterRegistry>,
}

/// A wire request ready to send, with its interruption signals.
struct Prepared {
    request: Request<OutgoingBody>,
    cancel: CancellationToken,
    timeout: Timeout,
}

impl EngineClient {
    /// Build a client, selecting the transport from `config`.
    ///
    /// # Errors
    ///
    /// Fails for unsupported schemes, malformed endpoints and invalid
    /// transport/credential combinations. No connection is opened here.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let selection = transport::select(
            &config.endpoint,
            &config.credentials,
            config.named_pipe_connect_timeout,
        )?;
        let connector = EngineConnector::new(selection.transport);

        let http = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(connector.clone());

        Ok(EngineClient {
            http,
            connector,
            base_uri: Arc::from(selection.base_uri),
            capabilities: selection.capabilities,
            config: Arc::new(config),
            converters: Arc::new(ConverterRegistry::new()),
        })
    }

    /// Build a client from `DOCKER_HOST` and `DOCKER_API_VERSION`.
    pub fn from_env() -> Result<Self> {
        Self::new(EndpointConfig::from_env()?)
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Base URI requests are resolved against.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Capabilities of the selected transport.
    pub fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    /// Query converters shared by this client and its clones.
    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Dispatch `request` and shape the reply according to `mode`.
    pub async fn dispatch(
        &self,
        request: ApiRequest,
        mode: ResponseMode,
        handlers: &[&dyn ErrorHandler],
    ) -> Result<DispatchOutcome> {
        match mode {
            ResponseMode::Buffered => self
                .request(request, handlers)
                .await
                .map(DispatchOutcome::Buffered),
            ResponseMode::StreamedBody => self
                .request_body_stream(request, handlers)
                .await
                .map(DispatchOutcome::Body),
            ResponseMode::StreamedHeadersOnly => self
                .request_streamed(request, handlers)
                .await
                .map(DispatchOutcome::Streamed),
            ResponseMode::Hijacked => self
                .request_hijacked(request, handlers)
                .await
                .map(DispatchOutcome::Hijacked),
        }
    }

    /// Send `request` and read the whole body.
    ///
    /// The timeout covers both the exchange and the body read.
    pub async fn request(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
    ) -> Result<ApiResponse> {
        let Prepared {
            request: wire,
            cancel,
            timeout,
        } = self.prepare(request, ResponseMode::Buffered)?;
        let exchange = async {
            let response = self.http.request(wire).await?;
            let response = intercept(response, handlers).await?;
            let status = response.status();
            let bytes = response.into_body().collect().await?.to_bytes();
            Ok(ApiResponse {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            })
        };
        race(exchange, &cancel, timeout).await
    }

    /// Send `request` and return the open body once headers arrive.
    pub async fn request_body_stream(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
    ) -> Result<ResponseBody> {
        Ok(self.request_streamed(request, handlers).await?.body)
    }

    /// Send `request` and return status, headers and the open body once headers arrive.
    pub async fn request_streamed(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
    ) -> Result<StreamedResponse> {
        let Prepared {
            request: wire,
            cancel,
            timeout,
        } = self.prepare(request, ResponseMode::StreamedHeadersOnly)?;
        let exchange = async {
            let response = self.http.request(wire).await?;
            intercept(response, handlers).await
        };
        let response = race(exchange, &cancel, timeout).await?;
        Ok(into_streamed(response))
    }

    /// Send `request` without any error interception.
    ///
    /// Error statuses are returned like any other response.
    pub async fn request_raw(&self, request: ApiRequest) -> Result<StreamedResponse> {
        let Prepared {
            request: wire,
            cancel,
            timeout,
        } = self.prepare(request, ResponseMode::StreamedHeadersOnly)?;
        let exchange = async { Ok(self.http.request(wire).await?) };
        let response = race(exchange, &cancel, timeout).await?;
        Ok(into_streamed(response))
    }

    /// Send `request` on a dedicated connection and take it over once upgraded.
    ///
    /// `Connection: Upgrade` and `Upgrade: tcp` are added unless already set. A `101`
    /// reply is the negotiated upgrade; handlers still run, without a body.
    ///
    /// # Errors
    ///
    /// If the runtime answers without upgrading, error statuses go through the handlers as
    /// usual; any other reply fails with [`EngineError::UnsupportedOperation`]. The
    /// connection is closed in both cases.
    pub async fn request_hijacked(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
    ) -> Result<HijackedStream> {
        if !self.capabilities.hijack {
            return Err(EngineError::UnsupportedOperation(
                "the transport does not support hijacked connections".into(),
            ));
        }

        let Prepared {
            request: mut wire,
            cancel,
            timeout,
        } = self.prepare(request, ResponseMode::Hijacked)?;

        // dedicated connections talk origin-form
        let (target, host) = origin_form(wire.uri())?;
        *wire.uri_mut() = target;
        wire.headers_mut().entry(HOST).or_insert(host);
        ensure_upgrade_headers(wire.headers_mut());

        let can_close_write = self.capabilities.half_close;
        let exchange = async {
            let io = self
                .connector
                .transport()
                .connect()
                .await
                .map_err(|err| EngineError::Connection(Box::new(err)))?;
            let (mut sender, connection) =
                hyper::client::conn::http1::handshake::<_, OutgoingBody>(io).await?;
            let _driver = AbortOnDrop(tokio::spawn(async move {
                if let Err(err) = connection.with_upgrades().await {
                    tracing::warn!("hijacked connection failed: {}", err);
                }
            }));

            let mut response = sender.send_request(wire).await?;
            let status = response.status();

            if is_upgrade_status(status) {
                classify_upgrade(status, handlers)?;
                let upgraded = hyper::upgrade::on(&mut response).await?;
                tracing::debug!("connection upgraded (half-close: {})", can_close_write);
                return Ok(HijackedStream::new(TokioIo::new(upgraded), can_close_write));
            }

            intercept(response, handlers).await?;
            Err(EngineError::UnsupportedOperation(format!(
                "the runtime did not upgrade the connection (status {status})"
            )))
        };
        race(exchange, &cancel, timeout).await
    }

    /// Send `request` and decode the body as text lines.
    pub async fn stream_lines(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
    ) -> Result<DecodedStream<String>> {
        let cancel = request.cancellation().clone();
        let body = self.request_body_stream(request, handlers).await?;
        Ok(stream::decode_lines(body, &cancel))
    }

    /// Send `request` and decode the body as back-to-back JSON values.
    pub async fn stream_json<T>(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
    ) -> Result<DecodedStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let cancel = request.cancellation().clone();
        let body = self.request_body_stream(request, handlers).await?;
        Ok(stream::decode_json(body, &cancel))
    }

    /// Send `request` and feed each body line to `callback` until the body ends or the
    /// request's cancellation token fires.
    pub async fn monitor_lines<F, Fut>(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
        callback: F,
    ) -> Result<()>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        stream::monitor(self.stream_lines(request, handlers).await?, callback).await
    }

    /// Send `request` and feed each decoded JSON value to `callback` until the body ends or
    /// the request's cancellation token fires.
    pub async fn monitor_json<T, F, Fut>(
        &self,
        request: ApiRequest,
        handlers: &[&dyn ErrorHandler],
        callback: F,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        stream::monitor(self.stream_json::<T>(request, handlers).await?, callback).await
    }

    fn prepare(&self, mut request: ApiRequest, mode: ResponseMode) -> Result<Prepared> {
        let version = request.api_version().or(self.config.api_version);
        let uri = build_uri(&self.base_uri, version, request.path(), request.query())?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT));
        if let Some(authorization) = self.config.credentials.authorization() {
            headers.insert(AUTHORIZATION, authorization);
        }
        for name in request.headers().keys() {
            headers.remove(name);
        }
        for (name, value) in request.headers() {
            headers.append(name.clone(), value.clone());
        }

        let body = match request.take_body() {
            Some(body) => {
                let (content_type, body) = body.into_parts();
                headers.insert(CONTENT_TYPE, content_type);
                body
            }
            None => empty_body(),
        };

        let timeout = request.timeout().unwrap_or(match mode {
            ResponseMode::Buffered => Timeout::After(self.config.default_timeout),
            _ => Timeout::Infinite,
        });

        tracing::debug!("dispatching {} {} ({:?}, {:?})", request.method(), uri, mode, timeout);

        let mut wire = Request::builder()
            .method(request.method().clone())
            .uri(uri)
            .version(Version::HTTP_11)
            .body(body)
            .map_err(|err| EngineError::InvalidArgument(format!("invalid request: {err}")))?;
        *wire.headers_mut() = headers;

        Ok(Prepared {
            request: wire,
            cancel: request.cancellation().clone(),
            timeout,
        })
    }
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("endpoint", &self.config.endpoint)
            .field("base_uri", &self.base_uri)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

fn into_streamed(response: Response<Incoming>) -> StreamedResponse {
    let (parts, body) = response.into_parts();
    StreamedResponse {
        status: parts.status,
        headers: parts.headers,
        body: ResponseBody::from_incoming(body),
    }
}

/// A `101` during hijack is the negotiated upgrade, not an error.
fn classify_upgrade(status: http::StatusCode, handlers: &[&dyn ErrorHandler]) -> Result<()> {
    for handler in handlers {
        handler.check(status, None)?;
    }
    Ok(())
}

/// Aborts the connection task when the exchange ends or is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `op` until it completes, `cancel` fires or `timeout` elapses.
///
/// Losing the race drops `op`, which aborts the in-flight exchange and releases its
/// connection.
pub(crate) async fn race<F, T>(op: F, cancel: &CancellationToken, timeout: Timeout) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    tokio::select! {
        biased;
        err = interrupted(cancel, timeout) => Err(err),
        result = op => result,
    }
}

async fn interrupted(cancel: &CancellationToken, timeout: Timeout) -> EngineError {
    match timeout {
        Timeout::After(limit) => tokio::select! {
            biased;
            _ = cancel.cancelled() => EngineError::Cancelled,
            _ = tokio::time::sleep(limit) => EngineError::TimedOut(limit),
        },
        Timeout::Infinite => {
            cancel.cancelled().await;
            EngineError::Cancelled
        }
    }
}
