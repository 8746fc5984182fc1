//! Error types for the dispatch engine.
//!
//! Every failure the engine can produce is a variant of [`EngineError`]. Callers that need to
//! branch on the *kind* of failure (retry, abort, report) use [`EngineError::category`] rather
//! than matching individual variants:
//!
//! | Category | Raised when |
//! |----------|-------------|
//! | [`ErrorCategory::Validation`] | A request or endpoint is rejected before any I/O |
//! | [`ErrorCategory::Connection`] | Connecting, TLS negotiation or the HTTP exchange fails |
//! | [`ErrorCategory::Protocol`] | The runtime answered with an error status |
//! | [`ErrorCategory::Cancellation`] | The caller cancelled or the timeout elapsed |
//! | [`ErrorCategory::Decode`] | A body could not be decoded |

use http::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used for transport-level sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// API resource kinds used by resource-specific "not found" errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A container.
    Container,
    /// An image.
    Image,
    /// A network.
    Network,
    /// A volume.
    Volume,
    /// A plugin.
    Plugin,
    /// A swarm secret.
    Secret,
    /// A swarm service.
    Service,
    /// A swarm task.
    Task,
    /// A swarm node.
    Node,
    /// An exec instance.
    Exec,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Container => "container",
            Self::Image => "image",
            Self::Network => "network",
            Self::Volume => "volume",
            Self::Plugin => "plugin",
            Self::Secret => "secret",
            Self::Service => "service",
            Self::Task => "task",
            Self::Node => "node",
            Self::Exec => "exec instance",
        };
        f.write_str(name)
    }
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected locally before any I/O.
    Validation,
    /// Transport or HTTP exchange failure.
    Connection,
    /// Error status returned by the runtime.
    Protocol,
    /// Cancelled by the caller or timed out.
    Cancellation,
    /// Malformed body content.
    Decode,
}

/// Errors raised by the dispatch engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A request argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The endpoint URI uses a scheme no transport handles.
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// The endpoint URI is structurally wrong for its scheme.
    #[error("malformed endpoint {endpoint}: {reason}")]
    MalformedEndpoint {
        /// The endpoint as configured.
        endpoint: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The transport cannot be combined with the configured credentials.
    #[error("unsupported transport combination: {0}")]
    UnsupportedTransport(String),

    /// The requested operation is not available on this connection.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Establishing the connection failed.
    #[error("failed to connect to container runtime: {0}")]
    Connection(#[source] BoxError),

    /// The HTTP exchange failed after the connection was established.
    #[error("HTTP error: {0}")]
    Http(#[source] BoxError),

    /// I/O on an established stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime reported that a resource does not exist.
    #[error("no such {kind} (status {status}): {body}")]
    NotFound {
        /// Kind of resource looked up.
        kind: ResourceKind,
        /// Status code received.
        status: StatusCode,
        /// Response body as received.
        body: String,
    },

    /// The runtime is in a state that rejects the operation.
    #[error("{message} (status {status})")]
    ServerState {
        /// Status code received.
        status: StatusCode,
        /// Description of the conflicting state.
        message: String,
        /// Response body as received.
        body: String,
    },

    /// Generic error status from the runtime.
    #[error("container runtime responded with status code={status}, response={body}")]
    Api {
        /// Status code received.
        status: StatusCode,
        /// Response body as received.
        body: String,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The request timeout elapsed.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stream ended in the middle of a value or was otherwise malformed.
    #[error("decode error: {0}")]
    Decode(String),
}

impl EngineError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument(_)
            | Self::UnsupportedScheme(_)
            | Self::MalformedEndpoint { .. }
            | Self::UnsupportedTransport(_)
            | Self::UnsupportedOperation(_) => ErrorCategory::Validation,
            Self::Connection(_) | Self::Http(_) | Self::Io(_) => ErrorCategory::Connection,
            Self::NotFound { .. } | Self::ServerState { .. } | Self::Api { .. } => {
                ErrorCategory::Protocol
            }
            Self::Cancelled | Self::TimedOut(_) => ErrorCategory::Cancellation,
            Self::Json(_) | Self::Decode(_) => ErrorCategory::Decode,
        }
    }

    /// True if the operation was cancelled or timed out.
    pub fn is_cancellation(&self) -> bool {
        self.category() == ErrorCategory::Cancellation
    }

    /// True if the runtime reported a missing resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api { status, .. } => *status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }

    /// Status code carried by protocol errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::NotFound { status, .. }
            | Self::ServerState { status, .. }
            | Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body carried by protocol errors.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::NotFound { body, .. }
            | Self::ServerState { body, .. }
            | Self::Api { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<hyper::Error> for EngineError {
    fn from(err: hyper::Error) -> Self {
        EngineError::Http(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for EngineError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            EngineError::Connection(Box::new(err))
        } else {
            EngineError::Http(Box::new(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_distinct() {
        assert_eq!(EngineError::Cancelled.category(), ErrorCategory::Cancellation);
        assert_eq!(
            EngineError::TimedOut(Duration::from_millis(5)).category(),
            ErrorCategory::Cancellation
        );
        let api = EngineError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".into(),
        };
        assert_eq!(api.category(), ErrorCategory::Protocol);
        assert!(!api.is_cancellation());
        assert_eq!(
            EngineError::InvalidArgument("path".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(EngineError::Decode("x".into()).category(), ErrorCategory::Decode);
    }

    #[test]
    fn test_not_found_detection() {
        let specific = EngineError::NotFound {
            kind: ResourceKind::Container,
            status: StatusCode::NOT_FOUND,
            body: "no such container".into(),
        };
        assert!(specific.is_not_found());
        assert_eq!(specific.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(specific.body(), Some("no such container"));

        let generic = EngineError::Api {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert!(generic.is_not_found());
        assert!(!EngineError::Cancelled.is_not_found());
    }

    #[test]
    fn test_api_error_message_carries_body() {
        let err = EngineError::Api {
            status: StatusCode::CONFLICT,
            body: "{\"message\":\"name in use\"}".into(),
        };
        let message = err.to_string();
        assert!(message.contains("409"));
        assert!(message.contains("name in use"));
    }
}
