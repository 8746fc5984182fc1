//! Error interception.
//!
//! Every dispatch passes its response through an ordered list of [`ErrorHandler`]s before the
//! body is handed to the caller. A status below 200 or at/above 400 is erroneous: the body is
//! read once as text and each handler gets a chance to raise a specific error. If none does,
//! the generic [`EngineError::Api`] is returned. For other statuses the handlers still run,
//! with no body, and the body is left untouched.

use crate::client::utils::is_error_status;
use crate::error::{EngineError, ResourceKind, Result};
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Response;

/// Inspects a response and may raise a specific error.
pub trait ErrorHandler: Send + Sync {
    /// Inspect `status` and, for erroneous statuses, the body text.
    fn check(&self, status: StatusCode, body: Option<&str>) -> Result<()>;
}

impl<F> ErrorHandler for F
where
    F: Fn(StatusCode, Option<&str>) -> Result<()> + Send + Sync,
{
    fn check(&self, status: StatusCode, body: Option<&str>) -> Result<()> {
        self(status, body)
    }
}

/// Maps `404 Not Found` to [`EngineError::NotFound`] for one resource kind.
///
/// ```
/// use dockhand::client::{ErrorHandler, NotFoundHandler};
/// use dockhand::ResourceKind;
/// use http::StatusCode;
///
/// let handler = NotFoundHandler::new(ResourceKind::Image);
/// let err = handler.check(StatusCode::NOT_FOUND, Some("no such image")).unwrap_err();
/// assert!(err.is_not_found());
/// assert!(handler.check(StatusCode::OK, None).is_ok());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NotFoundHandler {
    kind: ResourceKind,
}

impl NotFoundHandler {
    /// Handler for `kind`.
    pub const fn new(kind: ResourceKind) -> Self {
        NotFoundHandler { kind }
    }
}

impl ErrorHandler for NotFoundHandler {
    fn check(&self, status: StatusCode, body: Option<&str>) -> Result<()> {
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound {
                kind: self.kind,
                status,
                body: body.unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }
}

/// Maps one status to [`EngineError::ServerState`].
#[derive(Debug, Clone, Copy)]
pub struct ServerStateHandler {
    status: StatusCode,
    message: &'static str,
}

impl ServerStateHandler {
    /// The node is not part of a swarm.
    pub const NOT_IN_SWARM: ServerStateHandler = ServerStateHandler::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "node is not part of a swarm",
    );

    /// The node is already part of a swarm.
    pub const ALREADY_IN_SWARM: ServerStateHandler =
        ServerStateHandler::new(StatusCode::NOT_ACCEPTABLE, "node is already part of a swarm");

    /// Raise `message` whenever `status` is seen.
    pub const fn new(status: StatusCode, message: &'static str) -> Self {
        ServerStateHandler { status, message }
    }
}

impl ErrorHandler for ServerStateHandler {
    fn check(&self, status: StatusCode, body: Option<&str>) -> Result<()> {
        if status == self.status {
            return Err(EngineError::ServerState {
                status,
                message: self.message.to_string(),
                body: body.unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }
}

/// Run the handler chain for a status whose body (if erroneous) has already been read.
///
/// Handlers run in order; the first one that raises ends the chain.
pub fn classify(status: StatusCode, body: Option<&str>, handlers: &[&dyn ErrorHandler]) -> Result<()> {
    if is_error_status(status) {
        return Err(raise(status, body, handlers));
    }
    for handler in handlers {
        handler.check(status, body)?;
    }
    Ok(())
}

/// Error for an erroneous status: the first handler's, else [`EngineError::Api`].
fn raise(status: StatusCode, body: Option<&str>, handlers: &[&dyn ErrorHandler]) -> EngineError {
    for handler in handlers {
        if let Err(err) = handler.check(status, body) {
            return err;
        }
    }
    EngineError::Api {
        status,
        body: body.unwrap_or_default().to_string(),
    }
}

/// Intercept a live response. Consumes it only when the status is erroneous.
pub(crate) async fn intercept(
    response: Response<Incoming>,
    handlers: &[&dyn ErrorHandler],
) -> Result<Response<Incoming>> {
    let status = response.status();
    if !is_error_status(status) {
        classify(status, None, handlers)?;
        return Ok(response);
    }

    let bytes = response.into_body().collect().await?.to_bytes();
    let body = String::from_utf8_lossy(&bytes);
    tracing::debug!("runtime returned {}: {}", status, body);

    Err(raise(status, Some(&*body), handlers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_success_passes() {
        assert!(classify(StatusCode::OK, None, &[]).is_ok());
        assert!(classify(StatusCode::NO_CONTENT, None, &[]).is_ok());
        assert!(classify(StatusCode::NOT_MODIFIED, None, &[]).is_ok());
    }

    #[test]
    fn test_generic_error_carries_status_and_body() {
        let err = classify(StatusCode::INTERNAL_SERVER_ERROR, Some("boom"), &[]).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(err.body(), Some("boom"));
    }

    #[test]
    fn test_informational_status_is_erroneous() {
        let err = classify(StatusCode::SWITCHING_PROTOCOLS, Some(""), &[]).unwrap_err();
        assert!(matches!(err, EngineError::Api { .. }));
    }

    #[test]
    fn test_specific_handler_preempts_generic() {
        let not_found = NotFoundHandler::new(ResourceKind::Container);
        let err = classify(StatusCode::NOT_FOUND, Some("gone"), &[&not_found]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound { kind: ResourceKind::Container, ref body, .. } if body == "gone"
        ));
    }

    #[test]
    fn test_first_raise_ends_chain() {
        let calls = AtomicUsize::new(0);
        let counting = |_: StatusCode, _: Option<&str>| -> Result<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let swarm = ServerStateHandler::NOT_IN_SWARM;

        let err = classify(
            StatusCode::SERVICE_UNAVAILABLE,
            Some("This node is not a swarm manager."),
            &[&counting, &swarm, &counting],
        )
        .unwrap_err();

        assert!(matches!(err, EngineError::ServerState { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_see_success_without_body() {
        let seen = std::sync::Mutex::new(Vec::new());
        let record = |status: StatusCode, body: Option<&str>| -> Result<()> {
            seen.lock().unwrap().push((status, body.map(str::to_string)));
            Ok(())
        };
        classify(StatusCode::CREATED, None, &[&record]).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[(StatusCode::CREATED, None)]);
    }

    #[test]
    fn test_raise_always_yields_an_error() {
        let passing = |_: StatusCode, _: Option<&str>| -> Result<()> { Ok(()) };
        let err = raise(StatusCode::CONFLICT, Some("name in use"), &[&passing]);
        assert!(matches!(
            err,
            EngineError::Api { status: StatusCode::CONFLICT, ref body } if body == "name in use"
        ));

        let not_found = NotFoundHandler::new(ResourceKind::Image);
        let err = raise(StatusCode::NOT_FOUND, Some("missing"), &[&passing, &not_found]);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_already_in_swarm() {
        let handler = ServerStateHandler::ALREADY_IN_SWARM;
        let err = handler
            .check(StatusCode::NOT_ACCEPTABLE, Some("already part"))
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_ACCEPTABLE));
        assert!(handler.check(StatusCode::SERVICE_UNAVAILABLE, None).is_ok());
    }
}
