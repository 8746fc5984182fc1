//! Registry authentication header.
//!
//! Image pull/push and service operations carry registry credentials in the
//! `X-Registry-Auth` header as URL-safe base64 encoded JSON.
//!
//! # Header Formats
//!
//! | Input | Header value |
//! |-------|--------------|
//! | No credentials | `e30=` (base64 of `{}`) |
//! | Username and password | base64 of `{"username":"..","password":".."}` |
//! | Identity token | base64 of `{"identitytoken":".."}` |
//!
//! # Examples
//!
//! ```
//! use dockhand::protocol::{encode_registry_auth, RegistryAuth};
//!
//! let header = encode_registry_auth(None).unwrap();
//! assert_eq!(header, "e30=");
//!
//! let auth = RegistryAuth::basic("alice", "s3cret");
//! let header = encode_registry_auth(Some(&auth)).unwrap();
//! assert!(!header.is_empty());
//! ```

use crate::error::{EngineError, Result};
use crate::protocol::REGISTRY_AUTH_HEADER;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// Credentials for a container image registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Account name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Account password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Account e-mail, only used by legacy registries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Registry host, e.g. `registry.example.com`.
    #[serde(rename = "serveraddress", skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
    /// Token issued by the registry in place of a password.
    #[serde(rename = "identitytoken", skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
    /// Bearer token sent directly to the registry.
    #[serde(rename = "registrytoken", skip_serializing_if = "Option::is_none")]
    pub registry_token: Option<String>,
}

impl RegistryAuth {
    /// Username and password credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        RegistryAuth {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Identity token credentials.
    pub fn identity_token(token: impl Into<String>) -> Self {
        RegistryAuth {
            identity_token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Set the registry server address.
    pub fn with_server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = Some(address.into());
        self
    }
}

/// Encode credentials as an `X-Registry-Auth` header value.
///
/// `None` encodes the empty object, which the runtime accepts as anonymous access.
///
/// # Errors
///
/// Returns an error if the credentials cannot be serialized.
pub fn encode_registry_auth(auth: Option<&RegistryAuth>) -> Result<HeaderValue> {
    let json = match auth {
        Some(auth) => serde_json::to_vec(auth)?,
        None => b"{}".to_vec(),
    };
    let encoded = URL_SAFE.encode(json);
    HeaderValue::from_str(&encoded)
        .map_err(|err| EngineError::InvalidArgument(format!("invalid registry auth header: {err}")))
}

/// Build a header map holding only the `X-Registry-Auth` header.
pub fn registry_auth_headers(auth: Option<&RegistryAuth>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(REGISTRY_AUTH_HEADER),
        encode_registry_auth(auth)?,
    );
    Ok(headers)
}

/// Decode an `X-Registry-Auth` header value. Accepts both the URL-safe and standard
/// base64 alphabets.
///
/// # Examples
///
/// ```
/// use dockhand::protocol::decode_registry_auth;
///
/// let auth = decode_registry_auth("e30=").unwrap();
/// assert!(auth.username.is_none());
/// ```
pub fn decode_registry_auth(value: &str) -> Result<RegistryAuth> {
    let trimmed = value.trim();
    let raw = URL_SAFE
        .decode(trimmed)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(trimmed))
        .map_err(|err| EngineError::Decode(format!("invalid registry auth encoding: {err}")))?;
    Ok(serde_json::from_slice(&raw)?)
}
