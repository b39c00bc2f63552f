//! Units of transfer work and the per-job error table.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ce::{ArcError, JobId, TransferError, TransportError};

/// What a transfer task moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// A file in the session directory.
    File,
    /// A control-directory file fetched through the diagnose endpoint.
    Diagnose,
    /// A session directory whose entries become new tasks.
    Listing,
}

/// One file or directory to move between the CE and the local filesystem.
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// Position of the job in the caller's request, used to file errors.
    pub job_index: usize,
    pub job: JobId,
    /// Session-relative name; `""` is the session root.
    pub remote: String,
    pub local: PathBuf,
    pub kind: TransferKind,
    /// Shared by every task of the job. Only ever goes from false to true.
    pub cancel: Arc<AtomicBool>,
}

impl TransferTask {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Marks the job as cancelled; its remaining tasks are skipped.
    pub fn cancel_job(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

/// Errors collected per job while workers run.
pub(crate) struct ErrorTable {
    errors: Mutex<Vec<Vec<ArcError>>>,
}

impl ErrorTable {
    pub(crate) fn new(jobs: usize) -> Self {
        Self {
            errors: Mutex::new(vec![Vec::new(); jobs]),
        }
    }

    pub(crate) fn record(&self, job_index: usize, error: ArcError) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = errors.get_mut(job_index) {
            slot.push(error);
        }
    }

    /// Records the same error for every job.
    pub(crate) fn record_all(&self, error: &ArcError) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in errors.iter_mut() {
            slot.push(error.clone());
        }
    }

    /// Takes the collected errors, leaving the table empty.
    pub(crate) fn take(&self) -> Vec<Vec<ArcError>> {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        let jobs = errors.len();
        std::mem::replace(&mut *errors, vec![Vec::new(); jobs])
    }
}

/// Attaches the transferred name to an HTTP failure and reports local file
/// failures of the transport as transfer I/O errors.
pub(crate) fn with_name(name: &str, error: ArcError) -> ArcError {
    match error {
        ArcError::Http { status, message } => TransferError::Http {
            name: name.to_string(),
            status,
            message,
        }
        .into(),
        ArcError::Transport(TransportError::File { path, message }) => TransferError::Io { path, message }.into(),
        other => other,
    }
}
