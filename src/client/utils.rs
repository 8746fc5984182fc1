//! Utility functions for the dispatch engine.
//!
//! - Status code classification
//! - Header defaults for outgoing requests
//! - Origin-form request targets for dedicated connections

use crate::error::{EngineError, Result};
use http::header::{CONNECTION, UPGRADE};
use http::{HeaderMap, HeaderValue, StatusCode, Uri};

/// True if the runtime signals an error: anything below 200 or at/above 400.
///
/// # Examples
///
/// ```
/// use dockhand::client::is_error_status;
/// use http::StatusCode;
///
/// assert!(is_error_status(StatusCode::NOT_FOUND));
/// assert!(is_error_status(StatusCode::SWITCHING_PROTOCOLS));
/// assert!(!is_error_status(StatusCode::NOT_MODIFIED));
/// ```
pub fn is_error_status(status: StatusCode) -> bool {
    status.as_u16() < 200 || status.as_u16() >= 400
}

/// Check if status code indicates a successful upgrade
pub fn is_upgrade_status(status: StatusCode) -> bool {
    status == StatusCode::SWITCHING_PROTOCOLS
}

/// Add `Connection: Upgrade` and `Upgrade: tcp` unless the caller set them.
pub fn ensure_upgrade_headers(headers: &mut HeaderMap) {
    headers
        .entry(CONNECTION)
        .or_insert(HeaderValue::from_static("Upgrade"));
    headers
        .entry(UPGRADE)
        .or_insert(HeaderValue::from_static("tcp"));
}

/// Split an absolute URI into its origin-form target and `Host` value.
pub fn origin_form(uri: &Uri) -> Result<(Uri, HeaderValue)> {
    let authority = uri
        .authority()
        .ok_or_else(|| EngineError::InvalidArgument(format!("request URI has no authority: {uri}")))?;
    let host = HeaderValue::from_str(authority.as_str())
        .map_err(|err| EngineError::InvalidArgument(format!("invalid host {authority}: {err}")))?;

    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse::<Uri>()
        .map_err(|err| EngineError::InvalidArgument(format!("invalid request target: {err}")))?;
    Ok((target, host))
}
