//! Delegation endpoints and the delegation lifecycle.
//!
//! A delegation is created in two steps: the CE issues a slot (with a
//! certificate signing request), then the client uploads the signed proxy.
//! [`DelegationManager`] keeps this atomic from the caller's point of view: if
//! anything fails after the slot exists, the slot is deleted before the error
//! is returned, so no half-created delegation is left on the CE.
//!
//! Token delegations are created with an `X-Delegation: Bearer <token>` header
//! and need no upload.

use std::sync::Arc;
use std::time::Duration;

use ce::json::one_or_many;
use ce::{ArcError, CertificateSigner, Delegation, DelegationId, DelegationKind, HttpRequest, Method};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::client::{expect_status, parse_json, ProtocolClient};

// ---------------------------------------------------------------------------
// Wire operations
// ---------------------------------------------------------------------------

impl ProtocolClient {
    fn delegations_url(&self) -> String {
        format!("{}/delegations", self.api_path())
    }

    fn delegation_url(&self, id: &DelegationId) -> String {
        format!("{}/delegations/{}", self.api_path(), id)
    }

    /// Lists delegations of the authenticated user.
    pub async fn list_delegations(&self) -> Result<Vec<Delegation>, ArcError> {
        let resp = self.send_json(HttpRequest::new(Method::Get, self.delegations_url())).await?;
        let doc = parse_json(&expect_status(resp, 200)?)?;
        doc.get("delegation")
            .map(one_or_many)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let id = entry
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(DelegationId::new)
                    .ok_or_else(|| ArcError::protocol("delegation entry without id"))?;
                let kind = match entry.get("type").and_then(Value::as_str) {
                    Some("jwt") => DelegationKind::Token,
                    _ => DelegationKind::Proxy,
                };
                Ok(Delegation {
                    id,
                    kind,
                    lifetime: None,
                })
            })
            .collect()
    }

    /// Requests a new delegation slot.
    ///
    /// Returns the slot ID and the body of the response, which is the CSR to
    /// sign for proxy delegations.
    pub async fn request_delegation(&self, token: Option<&str>) -> Result<(DelegationId, String), ArcError> {
        let mut request = HttpRequest::new(Method::Post, self.delegations_url()).query("action", "new");
        if let Some(token) = token {
            request = request.header("X-Delegation", format!("Bearer {token}"));
        }
        let resp = expect_status(self.send(request).await?, 201)?;
        let id = resp
            .header_value("Location")
            .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
            .and_then(DelegationId::new)
            .ok_or_else(|| ArcError::protocol("new delegation response without Location"))?;
        Ok((id, resp.text()))
    }

    /// Uploads a signed proxy into a delegation slot.
    pub async fn upload_delegation(&self, id: &DelegationId, signed_pem: &str) -> Result<(), ArcError> {
        let request = HttpRequest::new(Method::Put, self.delegation_url(id))
            .header("Content-Type", "application/x-pem-file")
            .body(signed_pem.as_bytes().to_vec());
        expect_status(self.send(request).await?, 200)?;
        Ok(())
    }

    /// Fetches the certificate currently stored in a delegation.
    pub async fn delegation_certificate(&self, id: &DelegationId) -> Result<String, ArcError> {
        let request = HttpRequest::new(Method::Post, self.delegation_url(id)).query("action", "get");
        Ok(expect_status(self.send(request).await?, 200)?.text())
    }

    /// Starts renewal of a delegation and returns the CSR to sign.
    pub async fn request_renewal(&self, id: &DelegationId, token: Option<&str>) -> Result<String, ArcError> {
        let mut request = HttpRequest::new(Method::Post, self.delegation_url(id)).query("action", "renew");
        if let Some(token) = token {
            request = request.header("X-Delegation", format!("Bearer {token}"));
        }
        Ok(expect_status(self.send(request).await?, 201)?.text())
    }

    pub async fn delete_delegation(&self, id: &DelegationId) -> Result<(), ArcError> {
        let request = HttpRequest::new(Method::Post, self.delegation_url(id)).query("action", "delete");
        expect_status(self.send(request).await?, 200)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Credential a delegation is backed by.
#[derive(Clone)]
pub enum DelegationCredential {
    /// Sign the CE's CSR with the user's proxy and upload the result.
    Proxy(Arc<dyn CertificateSigner>),
    /// Pass a bearer token; nothing is signed or uploaded.
    Token(String),
}

impl DelegationCredential {
    pub fn kind(&self) -> DelegationKind {
        match self {
            DelegationCredential::Proxy(_) => DelegationKind::Proxy,
            DelegationCredential::Token(_) => DelegationKind::Token,
        }
    }

    fn token(&self) -> Option<&str> {
        match self {
            DelegationCredential::Token(token) => Some(token),
            DelegationCredential::Proxy(_) => None,
        }
    }
}

impl std::fmt::Debug for DelegationCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegationCredential::Proxy(_) => f.write_str("Proxy"),
            DelegationCredential::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

/// Creates, renews, and deletes delegations with rollback on partial failure.
#[derive(Debug)]
pub struct DelegationManager<'a> {
    client: &'a ProtocolClient,
    credential: DelegationCredential,
}

impl<'a> DelegationManager<'a> {
    pub fn new(client: &'a ProtocolClient, credential: DelegationCredential) -> Self {
        Self { client, credential }
    }

    /// Creates a delegation and returns its ID.
    ///
    /// If signing or uploading fails, the new slot is deleted before the
    /// error is returned.
    #[instrument(skip(self), fields(kind = ?self.credential.kind()))]
    pub async fn create(&self, lifetime: Option<Duration>) -> Result<DelegationId, ArcError> {
        let (id, csr) = self.client.request_delegation(self.credential.token()).await?;
        debug!(delegation = %id, "delegation slot created");

        if let Err(err) = self.activate(&id, &csr, lifetime).await {
            self.rollback(&id).await;
            return Err(err);
        }
        info!(delegation = %id, "delegation created");
        Ok(id)
    }

    /// Renews a delegation in place.
    ///
    /// If signing or uploading the renewed proxy fails, the delegation is
    /// deleted before the error is returned.
    #[instrument(skip(self), fields(kind = ?self.credential.kind()))]
    pub async fn refresh(&self, id: &DelegationId, lifetime: Option<Duration>) -> Result<(), ArcError> {
        let csr = self.client.request_renewal(id, self.credential.token()).await?;
        if let Err(err) = self.activate(id, &csr, lifetime).await {
            self.rollback(id).await;
            return Err(err);
        }
        info!(delegation = %id, "delegation renewed");
        Ok(())
    }

    pub async fn delete(&self, id: &DelegationId) -> Result<(), ArcError> {
        self.client.delete_delegation(id).await
    }

    pub async fn list(&self) -> Result<Vec<Delegation>, ArcError> {
        self.client.list_delegations().await
    }

    async fn activate(&self, id: &DelegationId, csr: &str, lifetime: Option<Duration>) -> Result<(), ArcError> {
        match &self.credential {
            DelegationCredential::Token(_) => Ok(()),
            DelegationCredential::Proxy(signer) => {
                let pem = signer.sign(csr, lifetime)?;
                self.client.upload_delegation(id, &pem).await
            }
        }
    }

    async fn rollback(&self, id: &DelegationId) {
        match self.client.delete_delegation(id).await {
            Ok(()) => debug!(delegation = %id, "rolled back delegation"),
            Err(e) => warn!(delegation = %id, error = %e, "failed to roll back delegation"),
        }
    }
}
