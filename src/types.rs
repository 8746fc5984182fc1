//! Core request and response types.
//!
//! A dispatch starts from an [`ApiRequest`] (the request descriptor) and ends in one of the
//! shapes selected by [`ResponseMode`]:
//!
//! | Mode | Outcome |
//! |------|---------|
//! | [`ResponseMode::Buffered`] | [`ApiResponse`] with the whole body as text |
//! | [`ResponseMode::StreamedBody`] | [`ResponseBody`] left open for the caller |
//! | [`ResponseMode::StreamedHeadersOnly`] | [`StreamedResponse`]: status, headers, open body |
//! | [`ResponseMode::Hijacked`] | [`HijackedStream`] duplex channel |

use crate::client::HijackedStream;
use crate::error::{BoxError, EngineError, Result};
use crate::protocol::QueryString;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// HTTP body type sent on the wire.
pub(crate) type OutgoingBody = UnsyncBoxBody<Bytes, BoxError>;

/// Remote API version, rendered as `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
}

impl ApiVersion {
    /// Create a version from its components.
    pub const fn new(major: u32, minor: u32) -> Self {
        ApiVersion { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('v');
        let (major, minor) = trimmed
            .split_once('.')
            .ok_or_else(|| EngineError::InvalidArgument(format!("invalid API version: {s}")))?;
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| EngineError::InvalidArgument(format!("invalid API version: {s}")))
        };
        Ok(ApiVersion::new(parse(major)?, parse(minor)?))
    }
}

/// How long a dispatch may take before it fails with [`EngineError::TimedOut`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail once the duration has elapsed.
    After(Duration),
    /// Only the caller's cancellation token can stop the dispatch.
    Infinite,
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

enum Payload {
    Buffered(Bytes),
    Streamed(ByteStream),
}

/// Request payload, serialized exactly once when it is built.
pub struct RequestBody {
    content_type: HeaderValue,
    payload: Payload,
}

impl RequestBody {
    /// Serialize `value` as an `application/json` body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value)?;
        Ok(RequestBody {
            content_type: HeaderValue::from_static("application/json"),
            payload: Payload::Buffered(Bytes::from(encoded)),
        })
    }

    /// A fully buffered binary body.
    pub fn bytes(data: impl Into<Bytes>, content_type: &str) -> Result<Self> {
        Ok(RequestBody {
            content_type: content_type_value(content_type)?,
            payload: Payload::Buffered(data.into()),
        })
    }

    /// A binary body read from `stream` as it is sent, e.g. a build context tarball.
    pub fn stream<S>(stream: S, content_type: &str) -> Result<Self>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Ok(RequestBody {
            content_type: content_type_value(content_type)?,
            payload: Payload::Streamed(Box::pin(stream)),
        })
    }

    /// MIME type sent as `Content-Type`.
    pub fn content_type(&self) -> &HeaderValue {
        &self.content_type
    }

    pub(crate) fn into_parts(self) -> (HeaderValue, OutgoingBody) {
        let body = match self.payload {
            Payload::Buffered(bytes) => Full::new(bytes)
                .map_err(|never| match never {})
                .boxed_unsync(),
            Payload::Streamed(stream) => StreamBody::new(
                stream
                    .map_ok(hyper::body::Frame::data)
                    .map_err(|err| Box::new(err) as BoxError),
            )
            .boxed_unsync(),
        };
        (self.content_type, body)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = match &self.payload {
            Payload::Buffered(bytes) => format!("{} bytes", bytes.len()),
            Payload::Streamed(_) => "stream".to_string(),
        };
        f.debug_struct("RequestBody")
            .field("content_type", &self.content_type)
            .field("payload", &payload)
            .finish()
    }
}

fn content_type_value(content_type: &str) -> Result<HeaderValue> {
    if content_type.trim().is_empty() {
        return Err(EngineError::InvalidArgument(
            "body content type must not be empty".into(),
        ));
    }
    HeaderValue::from_str(content_type)
        .map_err(|_| EngineError::InvalidArgument(format!("invalid content type: {content_type}")))
}

pub(crate) fn empty_body() -> OutgoingBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// A logical request against the runtime API.
///
/// Built with a consuming builder and handed to the dispatcher by value. Transport details
/// never appear here; they come from the client's endpoint configuration.
///
/// # Examples
///
/// ```
/// use dockhand::{ApiRequest, Timeout};
/// use http::Method;
/// use std::time::Duration;
///
/// let request = ApiRequest::new(Method::GET, "containers/json")
///     .with_query("all", "true")
///     .with_timeout(Timeout::After(Duration::from_secs(5)));
/// assert_eq!(request.path(), "containers/json");
/// ```
#[derive(Debug)]
pub struct ApiRequest {
    method: Method,
    path: String,
    api_version: Option<ApiVersion>,
    query: QueryString,
    headers: HeaderMap,
    body: Option<RequestBody>,
    timeout: Option<Timeout>,
    cancel: CancellationToken,
}

impl ApiRequest {
    /// Create a request for `path`, relative to the versioned API root.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            api_version: None,
            query: QueryString::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Shorthand for a `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Shorthand for a `DELETE` request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Override the client's API version for this request only.
    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = Some(version);
        self
    }

    /// Append one query parameter, keeping insertion order.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.append(key, value);
        self
    }

    /// Replace the query string.
    pub fn with_query_string(mut self, query: QueryString) -> Self {
        self.query = query;
        self
    }

    /// Set a header, replacing any previous value for the same (case-insensitive) name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Merge a header map into the request.
    ///
    /// Names stay unique: when `headers` holds several values for a name, the last one wins.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        let mut current: Option<HeaderName> = None;
        for (name, value) in headers {
            // `None` continues the previous name
            if let Some(name) = name {
                current = Some(name);
            }
            if let Some(name) = &current {
                self.headers.insert(name.clone(), value);
            }
        }
        self
    }

    /// Attach a body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the timeout; unset requests use the mode's default.
    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Tie the request to a caller-owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Relative path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Per-request API version override.
    pub fn api_version(&self) -> Option<ApiVersion> {
        self.api_version
    }

    /// Query parameters.
    pub fn query(&self) -> &QueryString {
        &self.query
    }

    /// Caller-supplied headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Explicit timeout, if any.
    pub fn timeout(&self) -> Option<Timeout> {
        self.timeout
    }

    /// Cancellation token observed by the dispatch.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }
}

/// Shape of the reply a dispatch should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Read the whole body into an [`ApiResponse`].
    Buffered,
    /// Return only the open body as a [`ResponseBody`].
    StreamedBody,
    /// Complete once headers arrive; return a [`StreamedResponse`].
    StreamedHeadersOnly,
    /// Upgrade the connection into a [`HijackedStream`].
    Hijacked,
}

/// Fully buffered reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// Status code.
    pub status: StatusCode,
    /// Body text.
    pub body: String,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Open response body. Dropping it releases the underlying connection.
pub struct ResponseBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
}

impl ResponseBody {
    /// Wrap any byte stream, e.g. to feed the decoders from something other than HTTP.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        ResponseBody {
            inner: Box::pin(stream),
        }
    }

    pub(crate) fn from_incoming(body: hyper::body::Incoming) -> Self {
        Self::from_stream(body.into_data_stream().map_err(EngineError::from))
    }

    /// Read the remaining body into memory.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut collected = bytes::BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected.freeze())
    }

    /// Read the remaining body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

/// Streamed reply with its status line and headers.
#[derive(Debug)]
pub struct StreamedResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Open body; the caller owns the connection through it.
    pub body: ResponseBody,
}

/// Result of [`EngineClient::dispatch`](crate::EngineClient::dispatch), one variant per
/// [`ResponseMode`].
#[derive(Debug)]
pub enum DispatchOutcome {
    /// From [`ResponseMode::Buffered`].
    Buffered(ApiResponse),
    /// From [`ResponseMode::StreamedBody`].
    Body(ResponseBody),
    /// From [`ResponseMode::StreamedHeadersOnly`].
    Streamed(StreamedResponse),
    /// From [`ResponseMode::Hijacked`].
    Hijacked(HijackedStream),
}
