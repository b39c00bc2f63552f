//! Download of session directories and diagnose files.

use std::path::{Component, Path};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ce::{is_diagnose_file, ArcError, JobId, OutputFilter, TransferError, DEFAULT_DIAGNOSE_DIR, DIAGNOSE_FILES};
use rest::ProtocolClient;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::{join_workers, TransferEngine};
use crate::queue::TaskQueue;
use crate::task::{with_name, ErrorTable, TransferKind, TransferTask};

/// What to download for one job.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: JobId,
    /// Session paths to fetch; empty fetches everything.
    pub filter: OutputFilter,
    /// Diagnose files to fetch; `None` fetches all of them.
    pub diagnose_files: Option<Vec<String>>,
    /// Directory below the download directory for diagnose files.
    pub diagnose_dir: String,
}

impl DownloadJob {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            filter: OutputFilter::all(),
            diagnose_files: None,
            diagnose_dir: DEFAULT_DIAGNOSE_DIR.to_string(),
        }
    }

    pub fn with_filter(mut self, filter: OutputFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_diagnose_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.diagnose_files = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_diagnose_dir(mut self, dir: impl Into<String>) -> Self {
        self.diagnose_dir = dir.into();
        self
    }

    fn diagnose_names(&self) -> Vec<String> {
        match &self.diagnose_files {
            Some(names) => names.clone(),
            None => DIAGNOSE_FILES.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl TransferEngine {
    /// Downloads the session directory and diagnose files of every job.
    ///
    /// Session files land in `{dir}/{job}/...`, diagnose files in
    /// `{dir}/{diagnose_dir}/{name}`. Returns one error list per job, in the
    /// order of `jobs`. Missing files are reported as
    /// [`TransferError::MissingOutputFile`] or
    /// [`TransferError::MissingDiagnoseFile`] and do not stop the rest of the
    /// job.
    #[instrument(skip_all, fields(jobs = jobs.len(), dir = %dir.display()))]
    pub async fn download(&self, dir: &Path, jobs: &[DownloadJob]) -> Vec<Vec<ArcError>> {
        let errors = Arc::new(ErrorTable::new(jobs.len()));
        let workers = self.workers();
        let queue = Arc::new(TaskQueue::new(workers));
        let filters: Arc<Vec<OutputFilter>> = Arc::new(jobs.iter().map(|j| j.filter.clone()).collect());

        for (index, job) in jobs.iter().enumerate() {
            let cancel = Arc::new(AtomicBool::new(false));
            match diagnose_tasks(index, job, dir, &cancel) {
                Ok(tasks) => tasks.into_iter().for_each(|task| queue.put(task)),
                Err(e) => {
                    debug!(job = %job.id, error = %e, "skipping job with invalid diagnose file");
                    errors.record(index, e);
                    continue;
                }
            }
            queue.put(TransferTask {
                job_index: index,
                job: job.id.clone(),
                remote: String::new(),
                local: dir.join(job.id.as_str()),
                kind: TransferKind::Listing,
                cancel,
            });
        }

        if queue.is_empty() {
            return errors.take();
        }

        let clients = match self.worker_clients(workers) {
            Ok(clients) => clients,
            Err(e) => {
                error!(error = %e, "could not connect download workers");
                errors.record_all(&e);
                return errors.take();
            }
        };
        info!(workers, "downloading job outputs");

        let handles = clients
            .into_iter()
            .map(|client| {
                tokio::spawn(download_worker(
                    client,
                    queue.clone(),
                    filters.clone(),
                    errors.clone(),
                ))
            })
            .collect();
        join_workers(handles).await;

        errors.take()
    }
}

fn diagnose_tasks(
    index: usize,
    job: &DownloadJob,
    dir: &Path,
    cancel: &Arc<AtomicBool>,
) -> Result<Vec<TransferTask>, ArcError> {
    job.diagnose_names()
        .into_iter()
        .map(|name| {
            if !is_diagnose_file(&name) {
                return Err(ArcError::InvalidDiagnoseFile { name });
            }
            Ok(TransferTask {
                job_index: index,
                job: job.id.clone(),
                local: dir.join(&job.diagnose_dir).join(&name),
                remote: name,
                kind: TransferKind::Diagnose,
                cancel: cancel.clone(),
            })
        })
        .collect()
}

async fn download_worker(
    client: ProtocolClient,
    queue: Arc<TaskQueue<TransferTask>>,
    filters: Arc<Vec<OutputFilter>>,
    errors: Arc<ErrorTable>,
) {
    while let Some(task) = queue.get().await {
        if task.is_cancelled() {
            debug!(job = %task.job, name = %task.remote, "skipping download for cancelled job");
            continue;
        }

        let result = match task.kind {
            TransferKind::Listing => {
                let filter = filters.get(task.job_index).cloned().unwrap_or_default();
                expand_listing(&client, &task, &filter, &queue).await
            }
            TransferKind::File | TransferKind::Diagnose => fetch(&client, &task).await.map(|()| Vec::new()),
        };
        match result {
            Ok(rejected) => rejected.into_iter().for_each(|e| errors.record(task.job_index, e)),
            Err(e) => {
                error!(job = %task.job, kind = ?task.kind, name = %task.remote, error = %e, "download failed");
                errors.record(task.job_index, e);
            }
        }
    }
}

/// Lists one session directory and queues its selected entries.
///
/// Entries that would resolve outside the directory are not queued; they come
/// back as errors for the job while the rest of the listing proceeds.
async fn expand_listing(
    client: &ProtocolClient,
    task: &TransferTask,
    filter: &OutputFilter,
    queue: &TaskQueue<TransferTask>,
) -> Result<Vec<ArcError>, ArcError> {
    let listing = client.download_listing(&task.job, &task.remote).await?;
    debug!(
        job = %task.job,
        dir = %task.remote,
        files = listing.files.len(),
        dirs = listing.dirs.len(),
        "listed session directory"
    );

    let mut rejected = Vec::new();
    let entries = listing
        .files
        .iter()
        .map(|name| (name, TransferKind::File))
        .chain(listing.dirs.iter().map(|name| (name, TransferKind::Listing)));
    for (name, kind) in entries {
        if !is_plain_entry(name) {
            warn!(job = %task.job, dir = %task.remote, name = %name, "refusing unsafe session entry");
            rejected.push(
                TransferError::UnsafeEntry {
                    dir: task.remote.clone(),
                    name: name.clone(),
                }
                .into(),
            );
            continue;
        }
        let child = TransferTask {
            job_index: task.job_index,
            job: task.job.clone(),
            remote: session_child(&task.remote, name),
            local: task.local.join(name),
            kind,
            cancel: task.cancel.clone(),
        };
        let selected = match kind {
            TransferKind::Listing => filter.accepts_dir(&child.remote),
            _ => filter.accepts_file(&child.remote),
        };
        if selected {
            queue.put(child);
        }
    }
    Ok(rejected)
}

/// A single normal path component: not empty, `.`, `..`, absolute, or
/// containing a separator.
fn is_plain_entry(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn session_child(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Streams one session or diagnose file to its local path.
async fn fetch(client: &ProtocolClient, task: &TransferTask) -> Result<(), ArcError> {
    match task.kind {
        TransferKind::Diagnose => client.download_diagnose_to(&task.job, &task.remote, &task.local).await,
        _ => client.download_file_to(&task.job, &task.remote, &task.local).await,
    }
    .map_err(|e| download_error(task, e))?;

    debug!(job = %task.job, name = %task.remote, path = %task.local.display(), "downloaded file");
    Ok(())
}

fn download_error(task: &TransferTask, error: ArcError) -> ArcError {
    match (task.kind, error.status()) {
        (TransferKind::File, Some(404)) => TransferError::MissingOutputFile {
            name: task.remote.clone(),
        }
        .into(),
        (TransferKind::Diagnose, Some(404)) => TransferError::MissingDiagnoseFile {
            name: task.remote.clone(),
        }
        .into(),
        _ => with_name(&task.remote, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce::{ApiVersion, HttpRequest, HttpResponse};
    use rest::testing::{json_response, FakeConnector, FakeTransport};
    use rest::DEFAULT_API_BASE;
    use serde_json::json;

    /// Serves a small session tree:
    ///
    /// ```text
    /// stdout
    /// missing        (404)
    /// results/a.txt
    /// results/deep/b.txt
    /// logs/run.log
    /// ```
    fn session_server(req: &HttpRequest) -> HttpResponse {
        let session = req.path.split_once("/session/").map(|(_, p)| p);
        let diagnose = req.path.split_once("/diagnose/").map(|(_, p)| p);
        match (session, diagnose) {
            (Some(""), _) => json_response(200, json!({"file": ["stdout", "missing"], "dir": ["results", "logs"]})),
            (Some("results"), _) => json_response(200, json!({"file": "a.txt", "dir": "deep"})),
            (Some("results/deep"), _) => json_response(200, json!({"file": "b.txt"})),
            (Some("logs"), _) => json_response(200, json!({"file": "run.log"})),
            (Some("missing"), _) => HttpResponse::new(404, "not found"),
            (Some(path), _) => HttpResponse::new(200, format!("content of {path}")),
            (_, Some("errors")) => HttpResponse::new(200, "diag errors"),
            (_, Some(_)) => HttpResponse::new(404, "not found"),
            _ => HttpResponse::new(400, "bad request"),
        }
    }

    fn engine(workers: usize) -> (TransferEngine, Arc<FakeTransport>) {
        let transport = FakeTransport::new(|req| Ok(session_server(req)));
        let client = ProtocolClient::new(ApiVersion::V1_1, DEFAULT_API_BASE, transport.clone());
        let engine = TransferEngine::new(client, FakeConnector::new(transport.clone())).with_workers(workers);
        (engine, transport)
    }

    fn job(id: &str) -> DownloadJob {
        DownloadJob::new(JobId::new(id).unwrap()).with_diagnose_files(Vec::<String>::new())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn whole_session_tree_is_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(4);

        let results = engine.download(dir.path(), &[job("j1")]).await;

        let root = dir.path().join("j1");
        assert_eq!(std::fs::read_to_string(root.join("stdout")).unwrap(), "content of stdout");
        assert_eq!(
            std::fs::read_to_string(root.join("results/deep/b.txt")).unwrap(),
            "content of results/deep/b.txt"
        );
        assert!(root.join("logs/run.log").is_file());
        assert!(matches!(
            &results[0][..],
            [ArcError::Transfer(TransferError::MissingOutputFile { name })] if name == "missing"
        ));
    }

    #[tokio::test]
    async fn filters_limit_what_is_listed_and_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, transport) = engine(2);
        let job = job("j1").with_filter(OutputFilter::new(["results/deep/b.txt", "stdout"]));

        let results = engine.download(dir.path(), &[job]).await;

        assert!(results[0].is_empty());
        let root = dir.path().join("j1");
        assert!(root.join("stdout").is_file());
        assert!(root.join("results/deep/b.txt").is_file());
        assert!(!root.join("results/a.txt").exists());
        let mut paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
        paths.sort();
        assert!(!paths.iter().any(|p| p.ends_with("/session/logs")));
    }

    #[tokio::test]
    async fn bare_slash_filter_selects_nothing_below_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, transport) = engine(2);
        let job = job("j1").with_filter(OutputFilter::new(["/"]));

        let results = engine.download(dir.path(), &[job]).await;

        assert!(results[0].is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn diagnose_files_use_their_own_directory_and_missing_error() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(3);
        let job = job("j1")
            .with_filter(OutputFilter::new(["stdout"]))
            .with_diagnose_files(["errors", "failed"])
            .with_diagnose_dir("j1.log");

        let results = engine.download(dir.path(), &[job]).await;

        assert_eq!(
            std::fs::read_to_string(dir.path().join("j1.log/errors")).unwrap(),
            "diag errors"
        );
        assert!(matches!(
            &results[0][..],
            [ArcError::Transfer(TransferError::MissingDiagnoseFile { name })] if name == "failed"
        ));
    }

    #[tokio::test]
    async fn invalid_diagnose_name_rejects_only_that_job() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, transport) = engine(2);
        let bad = job("j1").with_diagnose_files(["errors", "shadow"]);
        let good = job("j2").with_filter(OutputFilter::new(["stdout"]));

        let results = engine.download(dir.path(), &[bad, good]).await;

        assert!(matches!(&results[0][..], [ArcError::InvalidDiagnoseFile { name }] if name == "shadow"));
        assert!(results[1].is_empty());
        assert!(transport.requests().iter().all(|r| r.path.contains("/jobs/j2/")));
    }

    #[tokio::test]
    async fn listing_entries_outside_the_directory_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("abs-target").display().to_string();
        let listed = outside.clone();
        let transport = FakeTransport::new(move |req| {
            Ok(match req.path.split_once("/session/").map(|(_, p)| p) {
                Some("") => json_response(
                    200,
                    json!({"file": ["../../escaped", listed.as_str(), "stdout", "."], "dir": [".."]}),
                ),
                Some(path) => HttpResponse::new(200, format!("content of {path}")),
                None => HttpResponse::new(400, "bad request"),
            })
        });
        let client = ProtocolClient::new(ApiVersion::V1_1, DEFAULT_API_BASE, transport.clone());
        let engine = TransferEngine::new(client, FakeConnector::new(transport.clone())).with_workers(2);
        let base = dir.path().join("out/in");

        let results = engine.download(&base, &[job("j1")]).await;

        assert_eq!(
            std::fs::read_to_string(base.join("j1/stdout")).unwrap(),
            "content of stdout"
        );
        assert!(!dir.path().join("out/escaped").exists());
        assert!(!std::path::Path::new(&outside).exists());
        let refused: Vec<&str> = results[0]
            .iter()
            .filter_map(|e| match e {
                ArcError::Transfer(TransferError::UnsafeEntry { name, .. }) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(refused, vec!["../../escaped", outside.as_str(), ".", ".."]);
        assert_eq!(results[0].len(), 4);
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn only_single_normal_components_are_plain_entries() {
        assert!(is_plain_entry("stdout"));
        assert!(is_plain_entry("..hidden"));
        for name in ["", ".", "..", "a/b", "/etc/passwd", "..\\x"] {
            assert!(!is_plain_entry(name), "{name:?} accepted");
        }
    }

    #[tokio::test]
    async fn failed_subdirectory_listing_spares_siblings_and_other_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(|req| {
            let Some((prefix, path)) = req.path.split_once("/session/") else {
                return Ok(HttpResponse::new(400, "bad request"));
            };
            Ok(match path {
                "" => json_response(200, json!({"file": ["stdout", "stderr"], "dir": "results"})),
                "results" if prefix.ends_with("/j1") => HttpResponse::new(500, "listing broke"),
                "results" => json_response(200, json!({"file": "a.txt"})),
                other => HttpResponse::new(200, format!("content of {other}")),
            })
        });
        let client = ProtocolClient::new(ApiVersion::V1_1, DEFAULT_API_BASE, transport.clone());
        let engine = TransferEngine::new(client, FakeConnector::new(transport)).with_workers(3);

        let results = engine.download(dir.path(), &[job("j1"), job("j2")]).await;

        assert!(matches!(
            &results[0][..],
            [ArcError::Http { status: 500, .. }]
        ));
        assert!(dir.path().join("j1/stdout").is_file());
        assert!(dir.path().join("j1/stderr").is_file());
        assert!(!dir.path().join("j1/results").exists());
        assert!(results[1].is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("j2/results/a.txt")).unwrap(),
            "content of results/a.txt"
        );
    }

    #[test]
    fn default_diagnose_set_is_every_known_file() {
        let names = DownloadJob::new(JobId::new("j").unwrap()).diagnose_names();
        assert_eq!(names.len(), DIAGNOSE_FILES.len());
    }
}
