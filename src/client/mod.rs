//! Container runtime API client.
//!
//! This module provides the dispatch engine that drives a runtime's HTTP API over any
//! supported transport, enabling callers to:
//!
//! - **Send buffered requests** and get status and body text back
//! - **Follow long-running streams** of lines or JSON values (events, logs, progress)
//! - **Hijack connections** for interactive attach and exec sessions
//! - **Classify errors** through an ordered chain of handlers
//! - **Cancel or time out** any of the above, whatever the transport
//!
//! # Module Organization
//!
//! ```text
//! client/
//! ├── config      - Endpoint and credential configuration
//! ├── transport   - Transport selection and connectors
//! ├── dispatch    - EngineClient and the response modes
//! ├── interceptor - Error handler chain
//! ├── parser      - Incremental line and JSON parsers
//! ├── stream      - Cancellable decoded streams
//! ├── hijack      - Upgraded duplex connections
//! └── utils       - Utility functions
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EngineClient`] | Dispatches requests in every response mode |
//! | [`EndpointConfig`] | Endpoint, credentials, version and timeouts |
//! | [`ErrorHandler`] | One link of the error interception chain |
//! | [`DecodedStream`] | Lazy stream of lines or JSON values |
//! | [`HijackedStream`] | Duplex byte stream of an upgraded connection |
//!
//! # Examples
//!
//! ## Creating a Client
//!
//! ```
//! use dockhand::client::{EndpointConfig, EngineClient};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = EndpointConfig {
//!     default_timeout: Duration::from_secs(30),
//!     ..EndpointConfig::new("tcp://127.0.0.1:2375")
//! };
//! let client = EngineClient::new(config).unwrap();
//! assert_eq!(client.base_uri(), "http://127.0.0.1:2375/");
//! # });
//! ```
//!
//! ## Parsing Streams
//!
//! ```
//! use dockhand::client::{FrameParser, JsonParser};
//! use serde_json::Value;
//!
//! let mut parser = JsonParser::<Value>::new();
//! let values = parser.feed(br#"{"status":"Pulling"}{"status":"Done"}"#).unwrap();
//! assert_eq!(values.len(), 2);
//! ```

mod config;
mod dispatch;
mod hijack;
mod interceptor;
mod parser;
mod stream;
mod transport;
mod utils;

pub use config::{Credentials, EndpointConfig, TlsCredentials, DEFAULT_ENDPOINT};
pub use dispatch::EngineClient;
pub use hijack::{HijackReader, HijackWriter, HijackedStream};
pub use interceptor::{classify, ErrorHandler, NotFoundHandler, ServerStateHandler};
pub use parser::{FrameParser, JsonParser, LineParser};
pub use stream::{decode_json, decode_lines, monitor, monitor_json, monitor_lines, DecodedStream};
pub use transport::{
    select, EngineConnector, EngineIo, Transport, TransportCapabilities, TransportSelection,
};
pub use utils::*;
