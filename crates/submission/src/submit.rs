//! The batch submission pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use ce::description::{input_map, normalize};
use ce::matchmaking::match_job;
use ce::{
    ApiVersion, ArcError, BatchRunId, Connector, DelegationId, DescriptionCompiler, Job, JobDescription,
    JobState,
};
use rest::{DelegationCredential, DelegationManager, ProtocolClient};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};
use transfer::{TransferEngine, DEFAULT_WORKERS};

use crate::results::{BatchResults, SubmittedJob};

/// Switches for the optional stages of a submission.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Check queue, walltime, and runtimes against the CE before submitting.
    pub matchmake: bool,
    /// Add staging entries for executable, standard streams, and log dir.
    pub normalize: bool,
    /// Upload local input files of submitted jobs.
    pub upload: bool,
    /// Upload workers.
    pub workers: usize,
    /// Existing delegation to use; a new one is created when `None`.
    pub delegation: Option<DelegationId>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            matchmake: true,
            normalize: true,
            upload: true,
            workers: DEFAULT_WORKERS,
            delegation: None,
        }
    }
}

/// A description that made it through preparation.
struct Prepared {
    index: usize,
    document: String,
    inputs: BTreeMap<String, Option<String>>,
}

/// Submits batches of job descriptions to one CE.
pub struct Submitter<C> {
    client: ProtocolClient,
    connector: Arc<dyn Connector>,
    compiler: C,
    credential: DelegationCredential,
}

impl<C: DescriptionCompiler> Submitter<C> {
    pub fn new(
        client: ProtocolClient,
        connector: Arc<dyn Connector>,
        compiler: C,
        credential: DelegationCredential,
    ) -> Self {
        Self {
            client,
            connector,
            compiler,
            credential,
        }
    }

    /// Submits `descriptions` and returns one result per description.
    ///
    /// `queue` applies to descriptions that do not name their own. A failure
    /// of one description never affects the others, except that failures of
    /// the shared steps (creating the delegation, the bulk call itself) are
    /// recorded for every item they affect.
    pub async fn submit(&self, descriptions: &[String], queue: Option<&str>, options: &SubmitOptions) -> BatchResults {
        let run_id = BatchRunId::new_random();
        let span = info_span!(
            "submit_batch",
            run_id = %run_id,
            items = descriptions.len(),
            version = %self.client.version(),
        );
        self.run(run_id, descriptions, queue, options).instrument(span).await
    }

    async fn run(
        &self,
        run_id: BatchRunId,
        descriptions: &[String],
        queue: Option<&str>,
        options: &SubmitOptions,
    ) -> BatchResults {
        let mut results = BatchResults::new(run_id, descriptions.len());
        if descriptions.is_empty() {
            return results;
        }

        let delegation = match &options.delegation {
            Some(id) => id.clone(),
            None => match DelegationManager::new(&self.client, self.credential.clone()).create(None).await {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, "could not create delegation for batch");
                    results.fail_all(&e);
                    return results;
                }
            },
        };

        let mut ce_info = None;
        let mut prepared = Vec::new();
        for (index, text) in descriptions.iter().enumerate() {
            match self.prepare(text, queue, &delegation, options, &mut ce_info).await {
                Ok((document, inputs)) => prepared.push(Prepared {
                    index,
                    document,
                    inputs,
                }),
                Err(errors) => {
                    debug!(index, errors = errors.len(), "description rejected");
                    results.fail(index, errors);
                }
            }
        }

        if prepared.is_empty() {
            info!("no descriptions left to submit");
            return results;
        }

        let documents: Vec<String> = prepared.iter().map(|p| p.document.clone()).collect();
        let bulk = self.compiler.merge(&documents);
        let outcomes = match self
            .client
            .submit_batch(&bulk, self.compiler.content_type(), queue, Some(&delegation))
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(error = %e, items = prepared.len(), "bulk submission failed");
                for item in &prepared {
                    results.fail(item.index, vec![e.clone()]);
                }
                return results;
            }
        };

        let mut outcomes = outcomes.into_iter();
        let mut indices = Vec::new();
        let mut jobs = Vec::new();
        for item in prepared {
            match outcomes.next() {
                Some(Ok((id, state))) => {
                    results.succeed(
                        item.index,
                        SubmittedJob {
                            id: id.clone(),
                            state: state.clone(),
                            delegation: delegation.clone(),
                        },
                    );
                    let mut job = Job::new(id, Some(state));
                    job.delegation = Some(delegation.clone());
                    job.input_files = item.inputs;
                    indices.push(item.index);
                    jobs.push(job);
                }
                Some(Err(e)) => results.fail(item.index, vec![e]),
                None => results.fail(
                    item.index,
                    vec![ArcError::protocol("CE returned no result for submitted description")],
                ),
            }
        }
        info!(submitted = jobs.len(), "batch submitted");

        if options.upload && !jobs.is_empty() {
            self.upload_inputs(&mut results, &indices, &mut jobs, options.workers).await;
        }
        for (index, job) in indices.into_iter().zip(jobs) {
            results.record_job(index, job);
        }
        results
    }

    /// Turns one description text into a bulk document entry.
    async fn prepare(
        &self,
        text: &str,
        batch_queue: Option<&str>,
        delegation: &DelegationId,
        options: &SubmitOptions,
        ce_info: &mut Option<Result<Value, ArcError>>,
    ) -> Result<(String, BTreeMap<String, Option<String>>), Vec<ArcError>> {
        let v1_0 = self.client.version() == ApiVersion::V1_0;
        let mut description = self.compiler.parse(text).map_err(|e| vec![parse_error(e)])?;

        let queue = match description.queue().filter(|q| !q.is_empty()) {
            Some(own) => Some(own.to_string()),
            None => {
                // 1.0 has no queue parameter on submission.
                if let Some(queue) = batch_queue.filter(|_| v1_0) {
                    description.set_queue(queue);
                }
                batch_queue.map(str::to_string)
            }
        };

        if options.matchmake {
            if ce_info.is_none() {
                *ce_info = Some(self.client.ce_info().await);
            }
            if let Some(info) = ce_info.as_ref() {
                let info = info.as_ref().map_err(|e| vec![e.clone()])?;
                let runtimes: Vec<String> = description.runtimes().iter().map(ToString::to_string).collect();
                let violations = match_job(info, queue.as_deref(), &runtimes, description.walltime());
                if !violations.is_empty() {
                    return Err(violations.into_iter().map(ArcError::from).collect());
                }
            }
        }

        if v1_0 {
            description.set_delegation_id(delegation);
        }
        if options.normalize {
            normalize(&mut description);
        }

        let inputs = input_map(&description);
        let document = self.compiler.unparse(&description).map_err(|e| vec![unparse_error(e)])?;
        Ok((document, inputs))
    }

    /// Uploads inputs and replaces the result of every job with upload errors.
    ///
    /// Upload errors are also recorded on the job records themselves.
    async fn upload_inputs(&self, results: &mut BatchResults, indices: &[usize], jobs: &mut [Job], workers: usize) {
        let engine = TransferEngine::new(self.client.clone(), self.connector.clone()).with_workers(workers);
        let upload_errors = engine.upload(jobs).await;

        for ((&index, job), errors) in indices.iter().zip(jobs.iter_mut()).zip(upload_errors) {
            if errors.is_empty() {
                continue;
            }
            warn!(job = %job.id, errors = errors.len(), "input upload failed");
            for error in &errors {
                job.record_error(error.clone());
            }
            results.fail(
                index,
                vec![ArcError::InputUpload {
                    job: job.id.clone(),
                    state: job.state.clone().unwrap_or_else(|| JobState::Unknown(String::new())),
                    errors,
                }],
            );
        }
    }
}

fn parse_error(error: ArcError) -> ArcError {
    match error {
        ArcError::DescriptionParse { .. } => error,
        other => ArcError::DescriptionParse {
            message: other.to_string(),
        },
    }
}

fn unparse_error(error: ArcError) -> ArcError {
    match error {
        ArcError::DescriptionUnparse { .. } => error,
        other => ArcError::DescriptionUnparse {
            message: other.to_string(),
        },
    }
}
