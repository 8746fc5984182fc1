//! Decoded streams over open response bodies.
//!
//! Long-running endpoints (events, logs, build and pull progress) keep the response open and
//! write items as they happen. A [`DecodedStream`] turns such a body into a lazy sequence of
//! lines or JSON values. Every read races the caller's cancellation token, so a quiet stream
//! stops as soon as the token fires.
//!
//! # Stream End
//!
//! | Event | Yields | Then |
//! |-------|--------|------|
//! | Body ends | remaining items, final unterminated line | `None` |
//! | Token fires | `Err(EngineError::Cancelled)` once | `None`, body dropped |
//! | Bad bytes or read failure | items decoded before it, then the error once | `None`, body dropped |
//!
//! # Examples
//!
//! ```
//! use bytes::Bytes;
//! use dockhand::client::decode_lines;
//! use dockhand::ResponseBody;
//! use futures::stream;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let body = ResponseBody::from_stream(stream::iter(vec![Ok(Bytes::from_static(b"a\nb"))]));
//! let mut lines = decode_lines(body, &CancellationToken::new());
//!
//! assert_eq!(lines.next().await.unwrap().unwrap(), "a");
//! assert_eq!(lines.next().await.unwrap().unwrap(), "b");
//! assert!(lines.next().await.is_none());
//! # });
//! ```

use crate::client::parser::{FrameParser, JsonParser, LineParser};
use crate::error::{EngineError, Result};
use crate::types::ResponseBody;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// Lazy, non-restartable sequence of decoded items.
pub struct DecodedStream<T> {
    inner: BoxStream<'static, Result<T>>,
}

impl<T: Send + 'static> DecodedStream<T> {
    /// Decode `body` with `parser` until it ends, fails or `cancel` fires.
    pub fn new<P>(body: ResponseBody, parser: P, cancel: CancellationToken) -> Self
    where
        P: FrameParser<Item = T> + 'static,
    {
        let state = DecodeState {
            body: Some(body),
            parser,
            pending: VecDeque::new(),
            failure: None,
            cancel,
        };
        DecodedStream {
            inner: futures::stream::unfold(state, step).boxed(),
        }
    }

    /// Receive the next item.
    ///
    /// Returns `None` once the stream is finished.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.inner.next().await
    }
}

impl<T> Stream for DecodedStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct DecodeState<P: FrameParser> {
    /// `None` once the body ended or was dropped
    body: Option<ResponseBody>,
    parser: P,
    pending: VecDeque<P::Item>,
    /// Reported after the items decoded before it
    failure: Option<EngineError>,
    cancel: CancellationToken,
}

impl<P: FrameParser> DecodeState<P> {
    fn exhausted(&self) -> bool {
        self.body.is_none() && self.pending.is_empty() && self.failure.is_none()
    }

    fn fail(mut self, err: EngineError) -> Option<(Result<P::Item>, Self)> {
        self.body = None;
        self.pending.clear();
        self.failure = None;
        Some((Err(err), self))
    }

    fn defer(&mut self, err: EngineError) {
        self.body = None;
        self.failure = Some(err);
    }
}

enum Read {
    Cancelled,
    Chunk(Option<Result<Bytes>>),
}

async fn step<P: FrameParser>(mut state: DecodeState<P>) -> Option<(Result<P::Item>, DecodeState<P>)> {
    loop {
        if state.exhausted() {
            return None;
        }
        if state.cancel.is_cancelled() {
            tracing::debug!("stream cancelled by caller");
            return state.fail(EngineError::Cancelled);
        }
        if let Some(item) = state.pending.pop_front() {
            return Some((Ok(item), state));
        }
        if let Some(err) = state.failure.take() {
            return state.fail(err);
        }

        let body = state.body.as_mut()?;
        let read = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => Read::Cancelled,
            chunk = body.next() => Read::Chunk(chunk),
        };

        match read {
            Read::Cancelled => {
                tracing::debug!("stream cancelled by caller");
                return state.fail(EngineError::Cancelled);
            }
            Read::Chunk(Some(Ok(bytes))) => {
                let mut items = Vec::new();
                let decoded = state.parser.decode(&bytes, &mut items);
                state.pending.extend(items);
                if let Err(err) = decoded {
                    state.defer(err);
                }
            }
            Read::Chunk(Some(Err(err))) => state.defer(err),
            Read::Chunk(None) => {
                state.body = None;
                match state.parser.finish() {
                    Ok(Some(item)) => state.pending.push_back(item),
                    Ok(None) => {}
                    Err(err) => state.defer(err),
                }
            }
        }
    }
}

/// Decode `body` as text lines.
pub fn decode_lines(body: ResponseBody, cancel: &CancellationToken) -> DecodedStream<String> {
    DecodedStream::new(body, LineParser::new(), cancel.clone())
}

/// Decode `body` as back-to-back JSON values of type `T`.
pub fn decode_json<T>(body: ResponseBody, cancel: &CancellationToken) -> DecodedStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    DecodedStream::new(body, JsonParser::<T>::new(), cancel.clone())
}

/// Drive `stream`, awaiting `callback` for each item before decoding the next.
///
/// Returns `Ok(())` when the stream ends and the first error otherwise, including
/// [`EngineError::Cancelled`].
pub async fn monitor<T, F, Fut>(mut stream: DecodedStream<T>, mut callback: F) -> Result<()>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some(item) = stream.next().await {
        callback(item?).await;
    }
    Ok(())
}

/// Feed each line of `body` to `callback` until the body ends or `cancel` fires.
pub async fn monitor_lines<F, Fut>(
    body: ResponseBody,
    cancel: &CancellationToken,
    callback: F,
) -> Result<()>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    monitor(decode_lines(body, cancel), callback).await
}

/// Feed each JSON value of `body` to `callback` until the body ends or `cancel` fires.
pub async fn monitor_json<T, F, Fut>(
    body: ResponseBody,
    cancel: &CancellationToken,
    callback: F,
) -> Result<()>
where
    T: DeserializeOwned + Send + 'static,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    monitor(decode_json::<T>(body, cancel), callback).await
}
