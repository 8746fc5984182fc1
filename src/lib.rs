#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # Dockhand: dispatch engine for container runtime APIs
//!
//! This crate drives a container runtime's HTTP control API across heterogeneous transports:
//! TCP, TLS, Unix domain sockets and Windows named pipes.
//!
//! ## Overview
//!
//! A logical request ([`ApiRequest`]) is turned into one of:
//!
//! 1. **A buffered response** - status and body text
//! 2. **A long-lived stream** - text lines or back-to-back JSON values, decoded lazily
//! 3. **A hijacked connection** - raw duplex bytes for attach and exec sessions
//!
//! Timeouts and cancellation work the same whatever the transport, and every response passes
//! through an ordered chain of error handlers before its body is exposed.
//!
//! ## Key Features
//!
//! - **Transport selection**: `tcp://`, `http://`, `https://`, `unix://` and `npipe://` endpoints
//! - **Versioned API paths**: `v<major.minor>/` prefix from the client or per request
//! - **Cancellation**: every send and every stream read races a [`CancellationToken`]
//! - **Error interception**: resource-specific errors (`404` → no such container) before the
//!   generic one
//! - **Streaming decoders**: line and JSON-value framing with callback drivers
//! - **Half-close**: end attach input while still reading output, where the transport allows
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken
//!
//! ## Client Usage
//!
//! ```ignore
//! use dockhand::{ApiRequest, EngineClient, EndpointConfig, ResourceKind};
//! use dockhand::client::NotFoundHandler;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EngineClient::new(EndpointConfig::from_env()?)?;
//!
//!     // Buffered
//!     let info = client.request(ApiRequest::get("info"), &[]).await?;
//!     println!("{}", info.body);
//!
//!     // Streamed logs
//!     let logs = ApiRequest::get("containers/web/logs")
//!         .with_query("follow", "1")
//!         .with_query("stdout", "1");
//!     let not_found = NotFoundHandler::new(ResourceKind::Container);
//!     let mut lines = client.stream_lines(logs, &[&not_found]).await?;
//!     while let Some(line) = lines.next().await {
//!         println!("{}", line?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - **[types]** - Request descriptor, bodies, response modes and outcomes
//! - **[error]** - Error types and result handling
//! - **[client]** - Transport selection, dispatch, interception, streaming and hijacking
//! - **[protocol]** - URI building, query strings, registry auth and JSON conventions

pub mod client;
pub mod error;
pub mod protocol;
pub mod types;

pub use client::{
    Credentials, EndpointConfig, EngineClient, ErrorHandler, HijackedStream, TlsCredentials,
};
pub use error::{EngineError, ErrorCategory, ResourceKind, Result};
pub use types::{
    ApiRequest, ApiResponse, ApiVersion, DispatchOutcome, RequestBody, ResponseBody,
    ResponseMode, StreamedResponse, Timeout,
};

#[cfg(test)]
mod tests;
