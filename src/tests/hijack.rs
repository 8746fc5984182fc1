use super::support::*;
use crate::client::NotFoundHandler;
use crate::{ApiRequest, EngineError, ErrorCategory, ResourceKind};
use http::StatusCode;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const UPGRADED: &[u8] = b"HTTP/1.1 101 UPGRADED\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n";

async fn listen() -> (TcpListener, SocketAddr) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Upgrades one connection, reads until the client half-closes, then replies with
/// `echo:` and everything it received. Sends the request head on `heads`.
async fn echo_runtime(listener: TcpListener, heads: oneshot::Sender<String>) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let (head, mut received) = read_head(&mut socket).await;
    let _ = heads.send(head);

    socket.write_all(UPGRADED).await.unwrap();
    socket.read_to_end(&mut received).await.unwrap();

    socket.write_all(b"echo:").await.unwrap();
    socket.write_all(&received).await.unwrap();
    socket.shutdown().await.unwrap();
}

/// Replies to one request with `response` and reports whether the client then closed.
async fn refusing_runtime(listener: TcpListener, response: &'static [u8]) -> bool {
    let (mut socket, _) = listener.accept().await.unwrap();
    let _ = read_head(&mut socket).await;
    socket.write_all(response).await.unwrap();

    let mut rest = [0u8; 64];
    matches!(
        tokio::time::timeout(Duration::from_secs(2), socket.read(&mut rest)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

fn attach_request() -> ApiRequest {
    ApiRequest::post("containers/web/attach")
        .with_query("stream", "1")
        .with_query("stdin", "1")
}

#[tokio::test]
async fn test_upgrade_then_half_close() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let (heads_tx, heads_rx) = oneshot::channel();
    let runtime = tokio::spawn(echo_runtime(listener, heads_tx));

    let client = client_for(addr);
    let mut session = client.request_hijacked(attach_request(), &[]).await?;
    assert!(session.can_close_write());

    session.write_all(b"ls -la\n").await?;
    session.close_write().await?;

    let mut output = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), session.read_to_end(&mut output)).await??;
    assert_eq!(output, b"echo:ls -la\n");

    let head = heads_rx.await?.to_ascii_lowercase();
    assert!(head.starts_with("post /v1.41/containers/web/attach?stream=1&stdin=1 http/1.1"));
    assert!(head.contains("upgrade: tcp"));
    assert!(head.contains("connection: upgrade"));
    assert!(head.contains(&format!("host: {addr}")));

    runtime.await?;
    Ok(())
}

#[tokio::test]
async fn test_split_halves_on_separate_tasks() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let (heads_tx, _heads_rx) = oneshot::channel();
    tokio::spawn(echo_runtime(listener, heads_tx));

    let client = client_for(addr);
    let session = client.request_hijacked(attach_request(), &[]).await?;
    let (mut reader, mut writer) = session.into_split();

    let writing = tokio::spawn(async move {
        writer.write_all(b"one ").await?;
        writer.write_all(b"two").await?;
        writer.close_write().await
    });

    let mut output = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_to_string(&mut output)).await??;
    writing.await??;
    assert_eq!(output, "echo:one two");
    Ok(())
}

#[tokio::test]
async fn test_no_upgrade_is_unsupported_and_closes() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let runtime = tokio::spawn(refusing_runtime(
        listener,
        b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
    ));

    let client = client_for(addr);
    let err = client.request_hijacked(attach_request(), &[]).await.unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedOperation(_)));
    assert!(runtime.await?, "connection must be closed");
    Ok(())
}

#[tokio::test]
async fn test_error_status_runs_handlers() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    tokio::spawn(refusing_runtime(
        listener,
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 24\r\n\r\nNo such container: ghost",
    ));

    let client = client_for(addr);
    let not_found = NotFoundHandler::new(ResourceKind::Container);
    let err = client
        .request_hijacked(attach_request(), &[&not_found])
        .await
        .unwrap_err();
    match err {
        EngineError::NotFound { kind, status, body } => {
            assert_eq!(kind, ResourceKind::Container);
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body, "No such container: ghost");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_handlers_see_upgrade_without_body() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let (heads_tx, _heads_rx) = oneshot::channel();
    tokio::spawn(echo_runtime(listener, heads_tx));

    let calls = AtomicUsize::new(0);
    let observer = |status: StatusCode, body: Option<&str>| -> crate::Result<()> {
        calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(status, StatusCode::SWITCHING_PROTOCOLS);
        assert!(body.is_none());
        Ok(())
    };

    let client = client_for(addr);
    let session = client.request_hijacked(attach_request(), &[&observer]).await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(session);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_hijack() {
    let (listener, addr) = listen().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let client = client_for(addr);
    let err = client
        .request_hijacked(attach_request().with_cancellation(cancel), &[])
        .await
        .unwrap_err();
    assert!(err.is_cancellation());

    // nothing connected
    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err());
}

#[tokio::test]
async fn test_hijack_connection_failure() {
    init_tracing();
    let client = client_for(SocketAddr::from(([127, 0, 0, 1], closed_port())));
    let err = client.request_hijacked(attach_request(), &[]).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);
}

#[tokio::test]
async fn test_dropping_session_closes_connection() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let runtime = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_head(&mut socket).await;
        socket.write_all(UPGRADED).await.unwrap();
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), socket.read_to_end(&mut rest))
            .await
            .is_ok()
    });

    let client = client_for(addr);
    let session = client.request_hijacked(attach_request(), &[]).await?;
    drop(session);
    assert!(runtime.await?, "runtime must see end of stream");
    Ok(())
}
