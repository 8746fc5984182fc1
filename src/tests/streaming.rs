use super::support::*;
use crate::client::NotFoundHandler;
use crate::{ApiRequest, EngineError, ResourceKind};
use axum::body::{Body, Bytes};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn chunked(chunks: &'static [&'static [u8]]) -> Body {
    let items: Vec<Result<Bytes, std::io::Error>> =
        chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
    Body::from_stream(futures::stream::iter(items))
}

/// Body that sends `chunks` and then stays open.
fn open_ended(chunks: &'static [&'static [u8]]) -> Body {
    let items: Vec<Result<Bytes, std::io::Error>> =
        chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
    Body::from_stream(futures::stream::iter(items).chain(futures::stream::pending()))
}

#[derive(Debug, Deserialize, PartialEq)]
struct Progress {
    id: u32,
    status: String,
}

#[tokio::test]
async fn test_lines_delivered_in_order() -> anyhow::Result<()> {
    let router = Router::new().route(
        "/v1.41/containers/web/logs",
        get(|| async { chunked(&[b"alpha\nbra", b"vo\r\n", b"\ncharlie"]) }),
    );
    let addr = serve(router).await;
    let client = client_for(addr);

    let lines: Vec<String> = client
        .stream_lines(ApiRequest::get("containers/web/logs"), &[])
        .await?
        .map(|line| line.unwrap())
        .collect()
        .await;
    assert_eq!(lines, vec!["alpha", "bravo", "", "charlie"]);
    Ok(())
}

#[tokio::test]
async fn test_tty_progress_lines() -> anyhow::Result<()> {
    let router = Router::new().route(
        "/v1.41/containers/web/logs",
        get(|| async {
            chunked(&[b"Pulling fs layer\rDownloading\r", b"\ncaf\xe9 au lait\n", b"Done\r"])
        }),
    );
    let addr = serve(router).await;
    let client = client_for(addr);

    let mut lines = Vec::new();
    client
        .monitor_lines(ApiRequest::get("containers/web/logs"), &[], |line| {
            lines.push(line);
            async {}
        })
        .await?;
    assert_eq!(
        lines,
        vec!["Pulling fs layer", "Downloading", "caf\u{FFFD} au lait", "Done"]
    );
    Ok(())
}

#[tokio::test]
async fn test_json_values_delivered_typed() -> anyhow::Result<()> {
    let router = Router::new().route(
        "/v1.41/images/create",
        axum::routing::post(|| async {
            chunked(&[
                br#"{"id":1,"status":"Pulling"}{"id":2,"#,
                br#""status":"Extracting"}"#,
                b"\r\n",
                br#"{"id":3,"status":"Done"}"#,
            ])
        }),
    );
    let addr = serve(router).await;
    let client = client_for(addr);

    let mut seen = Vec::new();
    client
        .monitor_json::<Progress, _, _>(
            ApiRequest::post("images/create").with_query("fromImage", "alpine"),
            &[],
            |progress| {
                seen.push(progress);
                async {}
            },
        )
        .await?;

    let ids: Vec<u32> = seen.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(seen[1].status, "Extracting");
    Ok(())
}

#[tokio::test]
async fn test_cancellation_mid_stream() {
    let router = Router::new().route(
        "/v1.41/events",
        get(|| async { open_ended(&[b"{\"id\":1,\"status\":\"start\"}"]) }),
    );
    let addr = serve(router).await;
    let client = client_for(addr);

    let cancel = CancellationToken::new();
    let request = ApiRequest::get("events").with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    let mut delivered = 0;
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        client.monitor_json::<Progress, _, _>(request, &[], |_| {
            delivered += 1;
            let trigger = trigger.clone();
            async move {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    trigger.cancel();
                });
            }
        }),
    )
    .await
    .expect("cancellation must stop the stream");

    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert_eq!(delivered, 1);
}

#[tokio::test]
async fn test_end_of_stream_is_success() -> anyhow::Result<()> {
    let router = Router::new().route(
        "/v1.41/events",
        get(|| async { chunked(&[b"one\n", b"two"]) }),
    );
    let addr = serve(router).await;
    let client = client_for(addr);
    let cancel = CancellationToken::new();

    let mut lines = Vec::new();
    client
        .monitor_lines(
            ApiRequest::get("events").with_cancellation(cancel.clone()),
            &[],
            |line| {
                lines.push(line);
                async {}
            },
        )
        .await?;

    assert_eq!(lines, vec!["one", "two"]);
    assert!(!cancel.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn test_malformed_json_fails_stream() -> anyhow::Result<()> {
    let router = Router::new().route(
        "/v1.41/events",
        get(|| async { chunked(&[br#"{"id":1,"status":"ok"}"#, b"{oops}"]) }),
    );
    let addr = serve(router).await;
    let client = client_for(addr);

    let mut stream = client
        .stream_json::<Progress>(ApiRequest::get("events"), &[])
        .await?;
    assert_eq!(stream.next().await.unwrap()?.id, 1);
    assert!(matches!(stream.next().await, Some(Err(EngineError::Json(_)))));
    assert!(stream.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_stream_error_status_intercepted_before_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1.41/containers/ghost/logs")
        .with_status(404)
        .with_body("No such container: ghost")
        .create_async()
        .await;
    let client = client_for_url(&server.url());

    let not_found = NotFoundHandler::new(ResourceKind::Container);
    let result = client
        .stream_lines(ApiRequest::get("containers/ghost/logs"), &[&not_found])
        .await;
    assert!(matches!(
        result,
        Err(EngineError::NotFound { kind: ResourceKind::Container, .. })
    ));
}
