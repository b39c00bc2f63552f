//! Settings shared by every connection to one CE.

use std::path::Path;
use std::time::Duration;

use ce::TransportError;
use url::Url;

/// Endpoint and credentials of a CE connection.
#[derive(Clone)]
pub struct TransportConfig {
    /// Scheme, host, and port of the CE; any path is ignored.
    pub endpoint: Url,
    /// PEM holding the client certificate followed by its key.
    pub identity_pem: Option<Vec<u8>>,
    /// Bearer token sent as `Authorization` on every request.
    pub token: Option<String>,
    /// Per-request timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl TransportConfig {
    /// Creates a configuration without credentials.
    ///
    /// A bare host name is accepted and gets the `https` scheme.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let with_scheme = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let endpoint = Url::parse(&with_scheme).map_err(|e| TransportError::InvalidUrl {
            url: endpoint.to_string(),
            message: e.to_string(),
        })?;
        if endpoint.host_str().is_none() {
            return Err(TransportError::InvalidUrl {
                url: endpoint.to_string(),
                message: "no host".into(),
            });
        }
        Ok(Self {
            endpoint,
            identity_pem: None,
            token: None,
            timeout: None,
        })
    }

    /// Loads the client identity from a proxy certificate file.
    pub fn with_proxy_file(mut self, path: &Path) -> Result<Self, TransportError> {
        let pem = std::fs::read(path).map_err(|e| TransportError::Tls {
            message: format!("cannot read proxy file {}: {e}", path.display()),
        })?;
        self.identity_pem = Some(pem);
        Ok(self)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("identity", &self.identity_pem.is_some())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_https() {
        let config = TransportConfig::new("ce.example.org:443").unwrap();
        assert_eq!(config.endpoint.scheme(), "https");
        assert_eq!(config.endpoint.host_str(), Some("ce.example.org"));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        assert!(matches!(
            TransportConfig::new("https://"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn token_is_not_printed() {
        let config = TransportConfig::new("https://ce.example.org").unwrap().with_token("secret");
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn unreadable_proxy_is_a_tls_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = TransportConfig::new("https://ce.example.org")
            .unwrap()
            .with_proxy_file(&dir.path().join("x509up_u0"));
        assert!(matches!(result, Err(TransportError::Tls { .. })));
    }
}
