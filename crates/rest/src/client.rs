//! Version-bound protocol client.
//!
//! [`ProtocolClient`] exposes one operation set for every implemented API
//! version. Wire differences are normalized here and nowhere else:
//!
//! | Difference | 1.0 | 1.1 |
//! |------------|-----|-----|
//! | Single-item `job` lists in requests and responses | bare object | array |
//! | Queue and delegation on submission | inside the description | query parameters |
//! | Empty body on list endpoints | means "no items" | always JSON |
//!
//! Callers always see lists, one entry per requested item, in request order.

use std::path::Path;
use std::sync::Arc;

use ce::json::{as_u64, one_or_many};
use ce::{ApiVersion, ArcError, DelegationId, HttpRequest, HttpResponse, JobId, JobInfo, JobState, Method, Transport};
use serde_json::{json, Value};
use tracing::debug;

use crate::info::parse_job_info;

/// Default path prefix of the REST interface on the CE host.
pub const DEFAULT_API_BASE: &str = "/arex";

/// Outcome of one item of a batch call.
pub type ItemResult<T> = Result<T, ArcError>;

/// Management actions applied to a list of jobs in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
    Info,
    Status,
    Kill,
    Clean,
    Restart,
    Delegations,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::Info => "info",
            JobAction::Status => "status",
            JobAction::Kill => "kill",
            JobAction::Clean => "clean",
            JobAction::Restart => "restart",
            JobAction::Delegations => "delegations",
        }
    }
}

/// Client for one negotiated API version of one CE.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct ProtocolClient {
    version: ApiVersion,
    api_base: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("version", &self.version)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl ProtocolClient {
    pub fn new(version: ApiVersion, api_base: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            version,
            api_base: api_base.into(),
            transport,
        }
    }

    /// Creates a client for the same CE and version over another transport.
    pub fn with_transport(&self, transport: Arc<dyn Transport>) -> Self {
        Self {
            version: self.version,
            api_base: self.api_base.clone(),
            transport,
        }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Path prefix of every versioned endpoint, e.g. `/arex/rest/1.1`.
    pub fn api_path(&self) -> String {
        format!("{}/rest/{}", self.api_base, self.version)
    }

    // -----------------------------------------------------------------------
    // Request helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ArcError> {
        debug!(method = %request.method, path = %request.path, "sending request");
        Ok(self.transport.send(request).await?)
    }

    pub(crate) async fn send_json(&self, request: HttpRequest) -> Result<HttpResponse, ArcError> {
        self.send(request.header("Accept", "application/json")).await
    }

    pub(crate) async fn send_file(&self, request: HttpRequest, source: &Path) -> Result<HttpResponse, ArcError> {
        debug!(method = %request.method, path = %request.path, source = %source.display(), "sending file");
        Ok(self.transport.send_file(request, source).await?)
    }

    pub(crate) async fn receive_file(&self, request: HttpRequest, dest: &Path) -> Result<HttpResponse, ArcError> {
        debug!(method = %request.method, path = %request.path, dest = %dest.display(), "receiving file");
        Ok(self.transport.receive_file(request, dest).await?)
    }

    // -----------------------------------------------------------------------
    // CE and job listing
    // -----------------------------------------------------------------------

    /// Fetches the CE capability document.
    ///
    /// An empty body or anything other than a JSON object is a protocol
    /// error, so matchmaking never runs against a missing document.
    pub async fn ce_info(&self) -> Result<Value, ArcError> {
        let resp = self
            .send_json(HttpRequest::new(Method::Get, format!("{}/info", self.api_path())))
            .await?;
        let doc = parse_json(&expect_status(resp, 200)?)?;
        if doc.is_object() {
            Ok(doc)
        } else {
            Err(ArcError::protocol("CE info response is not a JSON document"))
        }
    }

    /// Lists the IDs of all jobs of the authenticated user.
    pub async fn list_jobs(&self) -> Result<Vec<JobId>, ArcError> {
        let resp = self
            .send_json(HttpRequest::new(Method::Get, format!("{}/jobs", self.api_path())))
            .await?;
        let doc = parse_json(&expect_status(resp, 200)?)?;
        job_items(&doc)
            .into_iter()
            .map(|job| {
                job.get("id")
                    .and_then(Value::as_str)
                    .and_then(JobId::new)
                    .ok_or_else(|| ArcError::protocol("job list entry without id"))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Submits a bulk description in one call.
    ///
    /// The outer error covers the call itself; each submitted item gets its own
    /// result, in document order. On 1.0 `queue` and `delegation` must already
    /// be set inside the description and are not sent separately.
    pub async fn submit_batch(
        &self,
        description: &str,
        content_type: &str,
        queue: Option<&str>,
        delegation: Option<&DelegationId>,
    ) -> Result<Vec<ItemResult<(JobId, JobState)>>, ArcError> {
        let mut request = HttpRequest::new(Method::Post, format!("{}/jobs", self.api_path()))
            .query("action", "new")
            .header("Content-Type", content_type)
            .body(description.as_bytes().to_vec());
        if self.version >= ApiVersion::V1_1 {
            if let Some(queue) = queue {
                request = request.query("queue", queue);
            }
            if let Some(delegation) = delegation {
                request = request.query("delegation_id", delegation.as_str());
            }
        }

        let resp = self.send_json(request).await?;
        let doc = parse_json(&expect_status(resp, 201)?)?;
        let items = job_items(&doc);
        Ok(items
            .into_iter()
            .map(|item| {
                let item = item_outcome(item, 201)?;
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(JobId::new)
                    .ok_or_else(|| ArcError::protocol("submitted job without id"))?;
                let state = item
                    .get("state")
                    .and_then(Value::as_str)
                    .map(JobState::parse)
                    .ok_or_else(|| ArcError::protocol(format!("submitted job {id} without state")))?;
                Ok((id, state))
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Job management
    // -----------------------------------------------------------------------

    /// Applies `action` to `jobs` and returns the raw per-job response items.
    ///
    /// The response has exactly one item per requested job, in request order.
    pub async fn manage(&self, jobs: &[JobId], action: JobAction) -> Result<Vec<Value>, ArcError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut items: Vec<Value> = jobs.iter().map(|id| json!({ "id": id.as_str() })).collect();
        let body = if self.version == ApiVersion::V1_0 && items.len() == 1 {
            json!({ "job": items.remove(0) })
        } else {
            json!({ "job": items })
        };

        let request = HttpRequest::new(Method::Post, format!("{}/jobs", self.api_path()))
            .query("action", action.as_str())
            .header("Content-Type", "application/json")
            .body(body.to_string().into_bytes());
        let resp = self.send_json(request).await?;
        let doc = parse_json(&expect_status(resp, 201)?)?;

        let results: Vec<Value> = job_items(&doc)
            .into_iter()
            .cloned()
            .collect();
        if results.len() != jobs.len() {
            return Err(ArcError::protocol(format!(
                "{} action returned {} results for {} jobs",
                action.as_str(),
                results.len(),
                jobs.len()
            )));
        }
        Ok(results)
    }

    pub async fn job_info(&self, jobs: &[JobId]) -> Result<Vec<ItemResult<JobInfo>>, ArcError> {
        let items = self.manage(jobs, JobAction::Info).await?;
        Ok(jobs
            .iter()
            .zip(&items)
            .map(|(job, item)| {
                let doc = item_outcome(item, 200)?.get("info_document").ok_or_else(|| ArcError::NoValue {
                    message: format!("No info document in successful info response for job {job}"),
                })?;
                parse_job_info(doc)
            })
            .collect())
    }

    pub async fn job_status(&self, jobs: &[JobId]) -> Result<Vec<ItemResult<JobState>>, ArcError> {
        let items = self.manage(jobs, JobAction::Status).await?;
        Ok(items
            .iter()
            .map(|item| {
                item_outcome(item, 200)?
                    .get("state")
                    .and_then(Value::as_str)
                    .map(JobState::parse)
                    .ok_or_else(|| ArcError::NoValue {
                        message: "No state in successful status response".into(),
                    })
            })
            .collect())
    }

    pub async fn kill_jobs(&self, jobs: &[JobId]) -> Result<Vec<ItemResult<()>>, ArcError> {
        self.accepted_action(jobs, JobAction::Kill).await
    }

    pub async fn clean_jobs(&self, jobs: &[JobId]) -> Result<Vec<ItemResult<()>>, ArcError> {
        self.accepted_action(jobs, JobAction::Clean).await
    }

    pub async fn restart_jobs(&self, jobs: &[JobId]) -> Result<Vec<ItemResult<()>>, ArcError> {
        self.accepted_action(jobs, JobAction::Restart).await
    }

    /// Returns the delegations each job uses.
    pub async fn job_delegations(
        &self,
        jobs: &[JobId],
    ) -> Result<Vec<ItemResult<Vec<DelegationId>>>, ArcError> {
        let items = self.manage(jobs, JobAction::Delegations).await?;
        Ok(items
            .iter()
            .map(|item| {
                let ids = item_outcome(item, 200)?
                    .get("delegation_id")
                    .ok_or_else(|| ArcError::NoValue {
                        message: "No delegation ID in successful response".into(),
                    })?;
                Ok(one_or_many(ids)
                    .into_iter()
                    .filter_map(Value::as_str)
                    .filter_map(DelegationId::new)
                    .collect())
            })
            .collect())
    }

    async fn accepted_action(&self, jobs: &[JobId], action: JobAction) -> Result<Vec<ItemResult<()>>, ArcError> {
        let items = self.manage(jobs, action).await?;
        Ok(items
            .iter()
            .map(|item| item_outcome(item, 202).map(|_| ()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Turns any status other than `expected` into an [`ArcError::Http`].
pub(crate) fn expect_status(resp: HttpResponse, expected: u16) -> Result<HttpResponse, ArcError> {
    if resp.status == expected {
        Ok(resp)
    } else {
        Err(ArcError::Http {
            status: resp.status,
            message: resp.text(),
        })
    }
}

/// Parses a JSON body; an empty body parses as `null`.
pub(crate) fn parse_json(resp: &HttpResponse) -> Result<Value, ArcError> {
    if resp.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&resp.body).map_err(|e| ArcError::protocol(format!("invalid JSON response: {e}")))
}

/// Returns the `job` entries of a response document as a list.
fn job_items(doc: &Value) -> Vec<&Value> {
    doc.get("job").map(one_or_many).unwrap_or_default()
}

/// Checks the `status-code` of one item of a batch response.
fn item_outcome(item: &Value, expected: u64) -> Result<&Value, ArcError> {
    let code = item
        .get("status-code")
        .and_then(as_u64)
        .ok_or_else(|| ArcError::protocol("batch result without status-code"))?;
    if code == expected {
        Ok(item)
    } else {
        Err(ArcError::Http {
            status: u16::try_from(code).unwrap_or(u16::MAX),
            message: item
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}
