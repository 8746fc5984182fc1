//! Wire conventions of the runtime API.
//!
//! - [`build_uri`] places the `v<major.minor>/` prefix and the query string
//! - [`query`] holds the ordered query string and value converters
//! - [`headers`] encodes the `X-Registry-Auth` header
//! - [`json`] has serde helpers for timestamps, durations and base64 payloads

pub mod headers;
pub mod json;
pub mod query;

pub use headers::{decode_registry_auth, encode_registry_auth, registry_auth_headers, RegistryAuth};
pub use query::{
    ConverterRegistry, DisplayQueryConverter, DurationSecondsConverter, JsonQueryConverter,
    QueryConverter, QueryString,
};

use crate::error::{EngineError, Result};
use crate::types::ApiVersion;
use http::Uri;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("dockhand/", env!("CARGO_PKG_VERSION"));

/// Header carrying base64 encoded registry credentials.
pub const REGISTRY_AUTH_HEADER: &str = "x-registry-auth";

/// Base URI used for transports that do not address a host (pipes, sockets).
pub const LOCAL_BASE_URI: &str = "http://localhost/";

/// Build the absolute request URI.
///
/// `base` must end in `/`. The version prefix is only added when a version is given, and the
/// `?` separator only when there is at least one query parameter.
///
/// # Examples
///
/// ```
/// use dockhand::{protocol::{build_uri, QueryString}, ApiVersion};
///
/// let uri = build_uri(
///     "http://localhost/",
///     Some(ApiVersion::new(1, 41)),
///     "/containers/json",
///     &QueryString::new(),
/// )
/// .unwrap();
/// assert_eq!(uri, "http://localhost/v1.41/containers/json");
/// ```
pub fn build_uri(
    base: &str,
    version: Option<ApiVersion>,
    path: &str,
    query: &QueryString,
) -> Result<Uri> {
    if path.trim().is_empty() {
        return Err(EngineError::InvalidArgument("request path must not be empty".into()));
    }

    let mut uri = String::with_capacity(base.len() + path.len() + 16);
    uri.push_str(base);
    if let Some(version) = version {
        uri.push_str(&format!("v{version}/"));
    }
    uri.push_str(path.trim_start_matches('/'));

    if !query.is_empty() {
        uri.push('?');
        uri.push_str(&query.encode());
    }

    uri.parse::<Uri>()
        .map_err(|err| EngineError::InvalidArgument(format!("invalid request URI {uri}: {err}")))
}
