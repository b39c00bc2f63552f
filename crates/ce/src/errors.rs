//! Error types for the CE client domain.
//!
//! [`ArcError`] is the single error type returned by every client operation.
//! Per-item operations (batch submission, management actions, transfers) never
//! return it for the whole call when only one item failed; instead each item's
//! result slot holds its own `ArcError`.
//!
//! All error types are `Clone` so result tables can be copied and errors can be
//! recorded on more than one job record without re-creating them.

use thiserror::Error;

use crate::{JobId, JobState};

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::Transport`] implementation.
///
/// An HTTP response with any status code is *not* a transport error; status
/// handling belongs to the protocol layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection dropped and the single transparent retry failed too.
    #[error("Connection lost: {message}")]
    Disconnected { message: String },

    /// The request did not complete within the configured timeout.
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    /// Client identity or TLS setup failed.
    #[error("TLS setup failed: {message}")]
    Tls { message: String },

    /// The endpoint URL could not be used.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Any other failure while sending the request or reading the response.
    #[error("Request failed: {message}")]
    Request { message: String },

    /// The local file streamed as a request body, or receiving a response
    /// body, could not be read or written.
    #[error("Local file {path}: {message}")]
    File { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Matchmaking
// ---------------------------------------------------------------------------

/// One reason a job's resource requirements cannot be met by the CE.
///
/// Matchmaking reports every violation it finds, one value per violation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchmakingError {
    /// The queue is not advertised, or is a mapped share rather than a queue.
    #[error("Queue {queue} not found")]
    QueueNotFound { queue: String },

    /// Walltime matching needs the queue's limits but the queue was not found.
    #[error("Queue {queue} not found to match walltime")]
    WalltimeQueueNotFound { queue: String },

    /// The requested walltime is above the queue's advertised maximum.
    #[error("Walltime {requested} higher than max walltime {max} for queue {queue}")]
    WalltimeExceeded {
        queue: String,
        requested: u64,
        max: u64,
    },

    /// The queue advertises a maximum walltime that is not a number of
    /// seconds, so the requested walltime cannot be checked.
    #[error("Queue {queue} advertises unreadable max walltime {value:?}")]
    InvalidMaxWalltime { queue: String, value: String },

    /// The runtime environment is not advertised by the CE.
    #[error("Runtime {runtime} not found")]
    RuntimeNotFound { runtime: String },
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Failure of a single file transfer to or from a job's session directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The CE returned 404 for a session file; common for optional outputs.
    #[error("Missing output file {name}")]
    MissingOutputFile { name: String },

    /// The CE returned 404 for a control-directory file.
    #[error("Missing diagnose file {name}")]
    MissingDiagnoseFile { name: String },

    /// The CE answered the transfer with another non-success status.
    #[error("Transfer of {name} failed with status {status}: {message}")]
    Http {
        name: String,
        status: u16,
        message: String,
    },

    /// Reading or writing the local file failed.
    #[error("Local file {path}: {message}")]
    Io { path: String, message: String },

    /// A session listing named an entry that does not stay below its
    /// directory, such as `..` or an absolute path. Nothing is written for it.
    #[error("Refusing session entry {name:?} outside {dir:?}")]
    UnsafeEntry { dir: String, name: String },
}

// ---------------------------------------------------------------------------
// Top-level client error
// ---------------------------------------------------------------------------

/// Errors produced by CE client operations.
#[derive(Debug, Clone, Error)]
pub enum ArcError {
    /// The server response was malformed or did not have the expected shape.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The server answered with a non-success status code.
    ///
    /// Also used for per-item codes inside batch responses.
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// A successful response lacked the value the operation returns.
    #[error("No value in result: {message}")]
    NoValue { message: String },

    /// Version negotiation found no usable API version.
    #[error("Unsupported API version: {message}")]
    UnsupportedVersion { message: String },

    /// Credential or delegation problem.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// A resource requirement of the job cannot be met.
    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),

    /// The job description could not be parsed.
    #[error("Failed to parse description: {message}")]
    DescriptionParse { message: String },

    /// The processed job description could not be serialised.
    #[error("Could not unparse processed description: {message}")]
    DescriptionUnparse { message: String },

    /// A transfer to or from the job's session directory failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A local input source is missing, not a file, or cannot be parsed.
    #[error("Input {name}: {message}")]
    InputValidation { name: String, message: String },

    /// The job was created on the CE but uploading its inputs failed.
    ///
    /// Carries the job ID and last known state so the caller does not lose
    /// track of a job that exists server-side.
    #[error("Input upload for job {job} failed with {} error(s)", .errors.len())]
    InputUpload {
        job: JobId,
        state: JobState,
        errors: Vec<ArcError>,
    },

    /// A diagnose file outside the fixed control-directory set was requested.
    #[error("Invalid diagnose file name {name}")]
    InvalidDiagnoseFile { name: String },

    /// The transport failed before a response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ArcError {
    /// Creates a [`ArcError::Protocol`] error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transfer(TransferError::Http { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_error_reports_error_count() {
        let err = ArcError::InputUpload {
            job: JobId::new("j1").unwrap(),
            state: JobState::Accepted,
            errors: vec![ArcError::protocol("a"), ArcError::protocol("b")],
        };
        assert_eq!(err.to_string(), "Input upload for job j1 failed with 2 error(s)");
    }

    #[test]
    fn status_is_exposed_for_http_errors() {
        let err = ArcError::Http {
            status: 404,
            message: "gone".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(ArcError::protocol("x").status(), None);
    }

    #[test]
    fn matchmaking_errors_display_transparently() {
        let err: ArcError = MatchmakingError::QueueNotFound { queue: "R".into() }.into();
        assert_eq!(err.to_string(), "Queue R not found");
    }
}
