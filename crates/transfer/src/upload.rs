//! Upload of local job inputs into session directories.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};

use ce::description::local_source;
use ce::{ArcError, Job};
use rest::ProtocolClient;
use tracing::{debug, error, info, instrument};

use crate::engine::{join_workers, TransferEngine};
use crate::task::{with_name, ErrorTable, TransferKind, TransferTask};

type Pool = Mutex<VecDeque<TransferTask>>;

impl TransferEngine {
    /// Uploads the local inputs of every job.
    ///
    /// Returns one error list per job, in the order of `jobs`; an empty list
    /// means every local input of that job was uploaded. A job whose local
    /// inputs cannot all be found is rejected before anything is transferred.
    /// After the first failed upload of a job, its remaining inputs are
    /// skipped.
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    pub async fn upload(&self, jobs: &[Job]) -> Vec<Vec<ArcError>> {
        let errors = ErrorTable::new(jobs.len());
        let mut pool = VecDeque::new();
        for (index, job) in jobs.iter().enumerate() {
            match input_tasks(index, job).await {
                Ok(tasks) => pool.extend(tasks),
                Err(e) => {
                    debug!(job = %job.id, error = %e, "skipping job with invalid input");
                    errors.record(index, e);
                }
            }
        }

        if pool.is_empty() {
            debug!("no local inputs to upload");
            return errors.take();
        }

        let count = self.workers().min(pool.len());
        let clients = match self.worker_clients(count) {
            Ok(clients) => clients,
            Err(e) => {
                error!(error = %e, "could not connect upload workers");
                for task in &pool {
                    errors.record(task.job_index, e.clone());
                }
                return dedup_errors(errors.take());
            }
        };
        info!(tasks = pool.len(), workers = count, "uploading job inputs");

        let pool: Arc<Pool> = Arc::new(Mutex::new(pool));
        let errors = Arc::new(errors);
        let handles = clients
            .into_iter()
            .map(|client| tokio::spawn(upload_worker(client, pool.clone(), errors.clone())))
            .collect();
        join_workers(handles).await;

        errors.take()
    }
}

/// Resolves a job's inputs into upload tasks, or rejects the whole job.
async fn input_tasks(index: usize, job: &Job) -> Result<Vec<TransferTask>, ArcError> {
    let cancel = Arc::new(AtomicBool::new(false));
    let mut tasks = Vec::new();
    for (name, source) in &job.input_files {
        let Some(path) = local_source(name, source.as_deref())? else {
            continue;
        };
        if !is_regular_file(&path).await {
            return Err(ArcError::InputValidation {
                name: name.clone(),
                message: format!("source {} is not a file", path.display()),
            });
        }
        tasks.push(TransferTask {
            job_index: index,
            job: job.id.clone(),
            remote: name.clone(),
            local: path,
            kind: TransferKind::File,
            cancel: cancel.clone(),
        });
    }
    Ok(tasks)
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn upload_worker(client: ProtocolClient, pool: Arc<Pool>, errors: Arc<ErrorTable>) {
    loop {
        let Some(task) = pool.lock().unwrap_or_else(PoisonError::into_inner).pop_front() else {
            break;
        };
        if task.is_cancelled() {
            debug!(job = %task.job, name = %task.remote, "skipping upload for cancelled job");
            continue;
        }

        if let Err(e) = upload_one(&client, &task).await {
            task.cancel_job();
            error!(job = %task.job, name = %task.remote, error = %e, "input upload failed");
            errors.record(task.job_index, e);
        } else {
            debug!(job = %task.job, name = %task.remote, "uploaded input");
        }
    }
}

async fn upload_one(client: &ProtocolClient, task: &TransferTask) -> Result<(), ArcError> {
    client
        .upload_file_from(&task.job, &task.remote, &task.local)
        .await
        .map_err(|e| with_name(&task.remote, e))
}

/// Connection failures are reported once per job, not once per input.
fn dedup_errors(mut table: Vec<Vec<ArcError>>) -> Vec<Vec<ArcError>> {
    for errors in &mut table {
        errors.dedup_by(|a, b| a.to_string() == b.to_string());
    }
    table
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use ce::{ApiVersion, HttpResponse, JobId, Method, TransferError};
    use rest::testing::{FakeConnector, FakeTransport};
    use rest::DEFAULT_API_BASE;

    fn engine(transport: Arc<FakeTransport>, workers: usize) -> (TransferEngine, Arc<FakeConnector>) {
        let client = ProtocolClient::new(ApiVersion::V1_1, DEFAULT_API_BASE, transport.clone());
        let connector = FakeConnector::new(transport);
        (TransferEngine::new(client, connector.clone()).with_workers(workers), connector)
    }

    fn job(id: &str, inputs: &[(&str, Option<String>)]) -> Job {
        let mut job = Job::new(JobId::new(id).unwrap(), None);
        job.input_files = inputs
            .iter()
            .map(|(name, source)| (name.to_string(), source.clone()))
            .collect::<BTreeMap<_, _>>();
        job
    }

    fn local_file(dir: &tempfile::TempDir, name: &str) -> Option<String> {
        let path = dir.path().join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        Some(path.display().to_string())
    }

    #[tokio::test]
    async fn failure_cancels_only_the_failing_job() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(|req| {
            Ok(if req.path.ends_with("/a2") {
                HttpResponse::new(500, "disk full")
            } else {
                HttpResponse::new(200, "")
            })
        });
        let (engine, _) = engine(transport.clone(), 1);
        let jobs = vec![
            job(
                "A",
                &[("a1", local_file(&dir, "a1")), ("a2", local_file(&dir, "a2")), ("a3", local_file(&dir, "a3"))],
            ),
            job("B", &[("b1", local_file(&dir, "b1"))]),
        ];

        let results = engine.upload(&jobs).await;

        let paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(
            paths,
            vec![
                "/arex/rest/1.1/jobs/A/session/a1",
                "/arex/rest/1.1/jobs/A/session/a2",
                "/arex/rest/1.1/jobs/B/session/b1",
            ]
        );
        assert_eq!(results[0].len(), 1);
        assert!(matches!(
            &results[0][0],
            ArcError::Transfer(TransferError::Http { name, status: 500, .. }) if name == "a2"
        ));
        assert!(results[1].is_empty());
    }

    #[tokio::test]
    async fn missing_local_file_rejects_job_before_any_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(|_| Ok(HttpResponse::new(200, "")));
        let (engine, _) = engine(transport.clone(), 4);
        let missing = Some(dir.path().join("nope").display().to_string());
        let jobs = vec![
            job("A", &[("ok", local_file(&dir, "ok")), ("gone", missing)]),
            job("B", &[("b", local_file(&dir, "b"))]),
        ];

        let results = engine.upload(&jobs).await;

        assert!(matches!(&results[0][..], [ArcError::InputValidation { name, .. }] if name == "gone"));
        assert!(results[1].is_empty());
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Put);
        assert!(requests[0].path.ends_with("/jobs/B/session/b"));
    }

    #[tokio::test]
    async fn remote_sources_are_not_uploaded() {
        let transport = FakeTransport::new(|_| Ok(HttpResponse::new(200, "")));
        let (engine, connector) = engine(transport.clone(), 4);
        let jobs = vec![job("A", &[("data", Some("https://example.org/data".into()))])];

        let results = engine.upload(&jobs).await;

        assert!(results[0].is_empty());
        assert!(transport.requests().is_empty());
        assert_eq!(connector.connections(), 0);
    }

    #[tokio::test]
    async fn worker_count_is_bounded_by_task_count() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(|_| Ok(HttpResponse::new(200, "")));
        let (engine, connector) = engine(transport.clone(), 10);
        let jobs = vec![job("A", &[("x", local_file(&dir, "x")), ("y", local_file(&dir, "y"))])];

        let results = engine.upload(&jobs).await;

        assert!(results[0].is_empty());
        assert_eq!(connector.connections(), 2);
        let mut bodies: Vec<Vec<u8>> = transport.requests().into_iter().map(|r| r.body).collect();
        bodies.sort();
        assert_eq!(bodies, vec![b"x".to_vec(), b"y".to_vec()]);
    }

    #[tokio::test]
    async fn connection_failure_is_reported_once_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(|_| Ok(HttpResponse::new(200, "")));
        let client = ProtocolClient::new(ApiVersion::V1_1, DEFAULT_API_BASE, transport.clone());
        let engine = TransferEngine::new(client, FakeConnector::failing(transport));
        let jobs = vec![job("A", &[("x", local_file(&dir, "x")), ("y", local_file(&dir, "y"))])];

        let results = engine.upload(&jobs).await;
        assert!(matches!(&results[0][..], [ArcError::Transport(_)]));
    }
}
