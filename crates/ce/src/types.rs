//! Shared value types for the CE client domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! state that the client updates over a job's lifetime: the negotiated API
//! version, server job states, job metadata, and delegation records.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArcError, DelegationId, JobId};

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// A REST API version implemented by this client.
///
/// The server advertises versions as plain strings. Only the versions listed
/// here have a total order; anything else the server advertises is ignored
/// during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    /// `/rest/1.0`: singleton lists are sent and returned as bare objects,
    /// queue and delegation travel inside the job description.
    V1_0,
    /// `/rest/1.1`: always-list encoding, queue and delegation as query parameters.
    V1_1,
}

impl ApiVersion {
    /// Every implemented version, lowest first.
    pub const IMPLEMENTED: [ApiVersion; 2] = [ApiVersion::V1_0, ApiVersion::V1_1];

    /// Returns the version string used on the wire and in URL paths.
    pub fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V1_0 => "1.0",
            ApiVersion::V1_1 => "1.1",
        }
    }

    /// Maps an advertised version string to an implemented version.
    pub fn from_advertised(version: &str) -> Option<Self> {
        Self::IMPLEMENTED.into_iter().find(|v| v.as_str() == version)
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp as reported by the CE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Format used by the CE for every timestamp in job info documents.
    pub const WIRE_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%SZ";

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses a timestamp in [`Self::WIRE_FORMAT`].
    pub fn parse_wire(value: &str) -> Option<Self> {
        chrono::NaiveDateTime::parse_from_str(value, Self::WIRE_FORMAT)
            .ok()
            .map(|naive| Self(naive.and_utc()))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::WIRE_FORMAT))
    }
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// Job state as reported by the CE's REST interface.
///
/// States the client does not know are preserved verbatim in
/// [`JobState::Unknown`] rather than rejected; the server owns this enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Accepting,
    Accepted,
    Preparing,
    Prepared,
    Submitting,
    Queuing,
    Running,
    Held,
    ExitingLrms,
    Other,
    Executed,
    Finishing,
    Finished,
    Failed,
    Killing,
    Killed,
    Wiped,
    /// A state string not known to this client.
    Unknown(String),
}

impl JobState {
    /// Parses the wire form of a state (e.g. `"FINISHED"`).
    pub fn parse(value: &str) -> Self {
        match value {
            "ACCEPTING" => Self::Accepting,
            "ACCEPTED" => Self::Accepted,
            "PREPARING" => Self::Preparing,
            "PREPARED" => Self::Prepared,
            "SUBMITTING" => Self::Submitting,
            "QUEUING" => Self::Queuing,
            "RUNNING" => Self::Running,
            "HELD" => Self::Held,
            "EXITINGLRMS" => Self::ExitingLrms,
            "OTHER" => Self::Other,
            "EXECUTED" => Self::Executed,
            "FINISHING" => Self::Finishing,
            "FINISHED" => Self::Finished,
            "FAILED" => Self::Failed,
            "KILLING" => Self::Killing,
            "KILLED" => Self::Killed,
            "WIPED" => Self::Wiped,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the wire form of the state.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Accepting => "ACCEPTING",
            Self::Accepted => "ACCEPTED",
            Self::Preparing => "PREPARING",
            Self::Prepared => "PREPARED",
            Self::Submitting => "SUBMITTING",
            Self::Queuing => "QUEUING",
            Self::Running => "RUNNING",
            Self::Held => "HELD",
            Self::ExitingLrms => "EXITINGLRMS",
            Self::Other => "OTHER",
            Self::Executed => "EXECUTED",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killing => "KILLING",
            Self::Killed => "KILLED",
            Self::Wiped => "WIPED",
            Self::Unknown(s) => s,
        }
    }

    /// Returns `true` once the job will not change state again on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Killed | Self::Wiped)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job metadata
// ---------------------------------------------------------------------------

/// Descriptive job metadata from an info query.
///
/// Every field is optional: the CE only reports what it knows for the job's
/// current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: Option<String>,
    pub job_type: Option<String>,
    pub local_id: Option<String>,
    pub owner: Option<String>,
    pub local_owner: Option<String>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub log_dir: Option<String>,
    pub queue: Option<String>,

    pub used_total_walltime: Option<u64>,
    pub used_total_cputime: Option<u64>,
    pub requested_total_walltime: Option<u64>,
    pub requested_total_cputime: Option<u64>,
    pub requested_slots: Option<u64>,
    pub exit_code: Option<i64>,
    pub waiting_position: Option<u64>,
    pub used_main_memory: Option<u64>,

    pub submission_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub working_area_erase_time: Option<Timestamp>,
    pub proxy_expiration_time: Option<Timestamp>,

    /// Error messages reported by the CE for the job.
    pub errors: Vec<String>,
    /// Worker nodes the job ran on, restricted to ASCII.
    pub execution_nodes: Vec<String>,

    pub state: Option<JobState>,
    /// State the job would be restarted from.
    pub restart_state: Option<JobState>,
}

/// Maximum number of errors retained per [`Job`]; older ones are dropped.
pub const MAX_JOB_ERRORS: usize = 32;

/// Local record of a job submitted to the CE.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub state: Option<JobState>,
    pub delegation: Option<DelegationId>,
    /// Remote-relative input names mapped to their declared source (if any).
    pub input_files: BTreeMap<String, Option<String>>,
    pub info: Option<JobInfo>,
    errors: VecDeque<ArcError>,
}

impl Job {
    /// Creates a job record for a freshly submitted job.
    pub fn new(id: JobId, state: Option<JobState>) -> Self {
        Self {
            id,
            state,
            delegation: None,
            input_files: BTreeMap::new(),
            info: None,
            errors: VecDeque::new(),
        }
    }

    /// Records an error, dropping the oldest one past [`MAX_JOB_ERRORS`].
    pub fn record_error(&mut self, error: ArcError) {
        if self.errors.len() == MAX_JOB_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }

    /// Errors recorded so far, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &ArcError> {
        self.errors.iter()
    }

    /// Replaces metadata with a fresh info document and adopts its state.
    pub fn update_from_info(&mut self, info: JobInfo) {
        if let Some(state) = &info.state {
            self.state = Some(state.clone());
        }
        self.info = Some(info);
    }
}

// ---------------------------------------------------------------------------
// Delegations
// ---------------------------------------------------------------------------

/// How a delegation is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegationKind {
    /// An X.509 proxy certificate signed by the client and uploaded.
    Proxy,
    /// A bearer token passed in the `X-Delegation` header; nothing is uploaded.
    Token,
}

/// A delegation as known to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    pub kind: DelegationKind,
    pub lifetime: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Session directory
// ---------------------------------------------------------------------------

/// Control-directory files that may be fetched through the diagnose endpoint.
pub const DIAGNOSE_FILES: [&str; 14] = [
    "failed",
    "local",
    "errors",
    "description",
    "diag",
    "comment",
    "status",
    "acl",
    "xml",
    "input",
    "output",
    "input_status",
    "output_status",
    "statistics",
];

/// Local subdirectory diagnose files are written to unless overridden.
pub const DEFAULT_DIAGNOSE_DIR: &str = "gmlog";

/// Returns `true` if `name` is a valid diagnose file name.
pub fn is_diagnose_file(name: &str) -> bool {
    DIAGNOSE_FILES.contains(&name)
}

/// Contents of one directory of a job's session area.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionListing {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}
