//! API version discovery and client binding.

use std::sync::Arc;

use ce::json::one_or_many;
use ce::{ApiVersion, ArcError, HttpRequest, Method, Transport};
use serde_json::Value;
use tracing::debug;

use crate::client::{expect_status, parse_json, ProtocolClient};

/// Finds out which API versions a CE speaks and binds a [`ProtocolClient`].
pub struct Negotiator {
    transport: Arc<dyn Transport>,
    api_base: String,
}

impl Negotiator {
    pub fn new(transport: Arc<dyn Transport>, api_base: impl Into<String>) -> Self {
        Self {
            transport,
            api_base: api_base.into(),
        }
    }

    /// Returns the versions advertised by the CE, in the CE's order.
    pub async fn discover(&self) -> Result<Vec<String>, ArcError> {
        let request = HttpRequest::new(Method::Get, format!("{}/rest", self.api_base))
            .header("Accept", "application/json");
        let resp = expect_status(self.transport.send(request).await?, 200)?;
        let doc = parse_json(&resp)?;

        let versions: Vec<String> = doc
            .get("version")
            .map(one_or_many)
            .unwrap_or_default()
            .into_iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        if versions.is_empty() {
            return Err(ArcError::protocol("CE advertised no API versions"));
        }
        Ok(versions)
    }

    /// Discovers the advertised versions and binds a client.
    ///
    /// With `requested` set, that exact version is used if both sides support
    /// it. Otherwise the most preferred advertised version that is implemented
    /// here wins.
    pub async fn bind(self, requested: Option<&str>) -> Result<ProtocolClient, ArcError> {
        let advertised = self.discover().await?;
        let version = select_version(&advertised, requested)?;
        debug!(version = %version, advertised = ?advertised, "negotiated API version");
        Ok(ProtocolClient::new(version, self.api_base, self.transport))
    }
}

/// Picks the version to use from the advertised list.
///
/// The CE lists versions in ascending preference, so the list is scanned from
/// the end.
pub fn select_version(advertised: &[String], requested: Option<&str>) -> Result<ApiVersion, ArcError> {
    if let Some(requested) = requested {
        let version = ApiVersion::from_advertised(requested).ok_or_else(|| ArcError::UnsupportedVersion {
            message: format!("version {requested} is not implemented by this client"),
        })?;
        if !advertised.iter().any(|v| v == requested) {
            return Err(ArcError::UnsupportedVersion {
                message: format!("version {requested} is not supported by the CE"),
            });
        }
        return Ok(version);
    }

    advertised
        .iter()
        .rev()
        .find_map(|v| ApiVersion::from_advertised(v))
        .ok_or_else(|| ArcError::UnsupportedVersion {
            message: format!("no implemented version among {}", advertised.join(", ")),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DEFAULT_API_BASE;
    use crate::testing::{json_response, FakeTransport};
    use ce::HttpResponse;
    use serde_json::json;

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn highest_implemented_version_wins() {
        let advertised = strings(&["1.0", "1.1", "2.0"]);
        assert_eq!(select_version(&advertised, None).unwrap(), ApiVersion::V1_1);
    }

    #[test]
    fn requested_version_must_be_known_on_both_sides() {
        let advertised = strings(&["1.0"]);
        assert_eq!(select_version(&advertised, Some("1.0")).unwrap(), ApiVersion::V1_0);
        assert!(matches!(
            select_version(&advertised, Some("1.1")),
            Err(ArcError::UnsupportedVersion { .. })
        ));
        assert!(matches!(
            select_version(&strings(&["1.0", "9.9"]), Some("9.9")),
            Err(ArcError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn no_common_version_is_unsupported() {
        assert!(matches!(
            select_version(&strings(&["0.9", "2.0"]), None),
            Err(ArcError::UnsupportedVersion { .. })
        ));
    }

    #[tokio::test]
    async fn bind_accepts_a_singleton_version() {
        let transport = FakeTransport::new(|_| Ok(json_response(200, json!({"version": "1.0"}))));
        let client = Negotiator::new(transport.clone(), DEFAULT_API_BASE)
            .bind(None)
            .await
            .unwrap();
        assert_eq!(client.version(), ApiVersion::V1_0);
        assert_eq!(client.api_path(), "/arex/rest/1.0");
        assert_eq!(transport.requests()[0].path, "/arex/rest");
    }

    #[tokio::test]
    async fn empty_version_document_is_a_protocol_error() {
        let transport = FakeTransport::new(|_| Ok(HttpResponse::new(200, "")));
        let err = Negotiator::new(transport, DEFAULT_API_BASE).discover().await.unwrap_err();
        assert!(matches!(err, ArcError::Protocol { .. }));
    }

    #[tokio::test]
    async fn discover_reports_http_failures() {
        let transport = FakeTransport::new(|_| Ok(HttpResponse::new(503, "down")));
        let err = Negotiator::new(transport, DEFAULT_API_BASE).discover().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }
}
