//! Endpoint configuration.

use crate::error::{EngineError, Result};
use crate::types::ApiVersion;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::HeaderValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls;

/// Default endpoint of a local runtime on this platform.
#[cfg(windows)]
pub const DEFAULT_ENDPOINT: &str = "npipe://./pipe/docker_engine";

/// Default endpoint of a local runtime on this platform.
#[cfg(not(windows))]
pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// TLS material handed to the TLS layer as-is.
#[derive(Clone)]
pub struct TlsCredentials {
    config: Arc<rustls::ClientConfig>,
}

impl TlsCredentials {
    /// Use a prepared rustls client configuration (roots, client certificate, verifier).
    pub fn new(config: Arc<rustls::ClientConfig>) -> Self {
        TlsCredentials { config }
    }

    /// The rustls configuration.
    pub fn config(&self) -> Arc<rustls::ClientConfig> {
        self.config.clone()
    }
}

impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentials").finish_non_exhaustive()
    }
}

/// Credentials used to reach the endpoint.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// No authentication.
    #[default]
    Anonymous,
    /// TLS, optionally with a client certificate inside the rustls configuration.
    Tls(TlsCredentials),
    /// HTTP basic authentication, optionally over TLS.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
        /// TLS material, if the endpoint is reached over TLS.
        tls: Option<TlsCredentials>,
    },
}

impl Credentials {
    /// TLS material, if any.
    pub fn tls(&self) -> Option<&TlsCredentials> {
        match self {
            Credentials::Anonymous => None,
            Credentials::Tls(tls) => Some(tls),
            Credentials::Basic { tls, .. } => tls.as_ref(),
        }
    }

    /// True if the credentials carry TLS material.
    pub fn is_tls(&self) -> bool {
        self.tls().is_some()
    }

    /// `Authorization` header value for basic credentials.
    pub fn authorization(&self) -> Option<HeaderValue> {
        match self {
            Credentials::Basic {
                username, password, ..
            } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                let mut value = HeaderValue::from_str(&format!("Basic {encoded}")).ok()?;
                value.set_sensitive(true);
                Some(value)
            }
            _ => None,
        }
    }
}

/// Configuration of an [`EngineClient`](crate::EngineClient).
///
/// Read once at client construction; the transport is selected from it then and cached.
///
/// # Examples
///
/// ```
/// use dockhand::EndpointConfig;
/// use std::time::Duration;
///
/// let config = EndpointConfig {
///     default_timeout: Duration::from_secs(30),
///     ..EndpointConfig::new("tcp://127.0.0.1:2375")
/// };
/// assert_eq!(config.endpoint, "tcp://127.0.0.1:2375");
/// ```
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Endpoint URI (`tcp`, `http`, `https`, `unix` or `npipe` scheme).
    pub endpoint: String,

    /// Credentials.
    pub credentials: Credentials,

    /// API version requested with every call, unless a request overrides it.
    pub api_version: Option<ApiVersion>,

    /// Timeout for buffered requests that do not set one.
    pub default_timeout: Duration,

    /// How long to keep retrying a busy named pipe.
    pub named_pipe_connect_timeout: Duration,

    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,

    /// Maximum number of idle pooled connections.
    pub max_idle_per_host: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials: Credentials::Anonymous,
            api_version: None,
            default_timeout: Duration::from_secs(100),
            named_pipe_connect_timeout: Duration::from_millis(100),
            pool_idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 32,
        }
    }
}

impl EndpointConfig {
    /// Default configuration pointing at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the API version.
    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = Some(version);
        self
    }

    /// Configuration from `DOCKER_HOST` and `DOCKER_API_VERSION`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable lookup.
    ///
    /// ```
    /// use dockhand::{ApiVersion, EndpointConfig};
    ///
    /// let config = EndpointConfig::from_env_with(|key| match key {
    ///     "DOCKER_HOST" => Some("tcp://10.0.0.2:2375".into()),
    ///     "DOCKER_API_VERSION" => Some("1.43".into()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(config.endpoint, "tcp://10.0.0.2:2375");
    /// assert_eq!(config.api_version, Some(ApiVersion::new(1, 43)));
    /// ```
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("DOCKER_HOST").filter(|h| !h.trim().is_empty()) {
            config.endpoint = host.trim().to_string();
        }

        if let Some(version) = lookup("DOCKER_API_VERSION").filter(|v| !v.trim().is_empty()) {
            config.api_version = Some(version.parse().map_err(|_| {
                EngineError::InvalidArgument(format!("invalid DOCKER_API_VERSION: {version}"))
            })?);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EndpointConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.default_timeout, Duration::from_secs(100));
        assert_eq!(config.named_pipe_connect_timeout, Duration::from_millis(100));
        assert!(config.api_version.is_none());
        assert!(!config.credentials.is_tls());
    }

    #[test]
    fn test_from_env_defaults_when_unset() {
        let config = EndpointConfig::from_env_with(|_| None).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_from_env_rejects_bad_version() {
        let result = EndpointConfig::from_env_with(|key| {
            (key == "DOCKER_API_VERSION").then(|| "latest".to_string())
        });
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn test_basic_authorization_header() {
        let credentials = Credentials::Basic {
            username: "admin".into(),
            password: "pw".into(),
            tls: None,
        };
        let header = credentials.authorization().unwrap();
        assert_eq!(header, "Basic YWRtaW46cHc=");
        assert!(header.is_sensitive());
        assert!(Credentials::Anonymous.authorization().is_none());
    }
}
