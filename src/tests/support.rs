use crate::{ApiVersion, EndpointConfig, EngineClient};
use axum::http::Uri;
use axum::Router;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;

pub const VERSION: ApiVersion = ApiVersion::new(1, 41);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Serve `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Replies with the request target it received.
pub fn echo_router() -> Router {
    Router::new().fallback(|uri: Uri| async move { uri.to_string() })
}

pub fn client_for(addr: SocketAddr) -> EngineClient {
    EngineClient::new(EndpointConfig::new(format!("tcp://{addr}")).with_api_version(VERSION))
        .unwrap()
}

pub fn unversioned_client_for(addr: SocketAddr) -> EngineClient {
    EngineClient::new(EndpointConfig::new(format!("tcp://{addr}"))).unwrap()
}

pub fn client_for_url(url: &str) -> EngineClient {
    EngineClient::new(EndpointConfig::new(url).with_api_version(VERSION)).unwrap()
}

/// A local port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Read an HTTP request head; returns it with any bytes read past it.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return (String::from_utf8_lossy(&buf).into_owned(), Vec::new());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(pos + 4);
            return (String::from_utf8_lossy(&buf).into_owned(), rest);
        }
    }
}
