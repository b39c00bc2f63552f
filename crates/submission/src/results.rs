//! Per-item results of a batch submission.

use ce::{ArcError, BatchRunId, DelegationId, Job, JobId, JobState};

/// A job the CE accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub id: JobId,
    pub state: JobState,
    pub delegation: DelegationId,
}

/// Outcome of one description: the submitted job, or every error that
/// prevented it.
pub type ItemOutcome = Result<SubmittedJob, Vec<ArcError>>;

/// Results of one batch, index-aligned with the submitted descriptions.
///
/// Next to each outcome sits the [`Job`] record of every description the CE
/// accepted, including jobs whose input upload failed afterwards. The record
/// carries the input map and the errors recorded while staging.
#[derive(Debug, Clone)]
pub struct BatchResults {
    run_id: BatchRunId,
    items: Vec<ItemOutcome>,
    jobs: Vec<Option<Job>>,
}

impl BatchResults {
    /// Creates a table for `len` descriptions, all still undecided.
    pub(crate) fn new(run_id: BatchRunId, len: usize) -> Self {
        Self {
            run_id,
            items: vec![Err(Vec::new()); len],
            jobs: vec![None; len],
        }
    }

    pub(crate) fn record_job(&mut self, index: usize, job: Job) {
        if let Some(slot) = self.jobs.get_mut(index) {
            *slot = Some(job);
        }
    }

    pub(crate) fn fail(&mut self, index: usize, errors: Vec<ArcError>) {
        if let Some(item) = self.items.get_mut(index) {
            *item = Err(errors);
        }
    }

    pub(crate) fn succeed(&mut self, index: usize, job: SubmittedJob) {
        if let Some(item) = self.items.get_mut(index) {
            *item = Ok(job);
        }
    }

    pub(crate) fn fail_all(&mut self, error: &ArcError) {
        for item in &mut self.items {
            *item = Err(vec![error.clone()]);
        }
    }

    /// Identifier of the batch, as recorded on its tracing span.
    pub fn run_id(&self) -> BatchRunId {
        self.run_id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ItemOutcome> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter()
    }

    /// Job record of the description at `index`, if the CE created a job.
    pub fn job(&self, index: usize) -> Option<&Job> {
        self.jobs.get(index).and_then(Option::as_ref)
    }

    /// Every job the CE created, in description order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().flatten()
    }

    /// Number of descriptions that resulted in a job.
    pub fn submitted(&self) -> usize {
        self.items.iter().filter(|item| item.is_ok()).count()
    }

    pub fn into_items(self) -> Vec<ItemOutcome> {
        self.items
    }
}
