//! Session directory and control-directory file access.
//!
//! The `_from`/`_to` variants stream between the CE and a local file; the
//! plain variants hold the whole file in memory.

use std::path::Path;

use ce::json::one_or_many;
use ce::{is_diagnose_file, ArcError, HttpRequest, JobId, Method, SessionListing};
use serde_json::Value;

use crate::client::{expect_status, parse_json, ProtocolClient};

impl ProtocolClient {
    fn session_url(&self, job: &JobId, session_path: &str) -> String {
        format!("{}/jobs/{}/session/{}", self.api_path(), job, session_path)
    }

    /// Stores `data` as `session_path` in the job's session directory.
    pub async fn upload_file(&self, job: &JobId, session_path: &str, data: Vec<u8>) -> Result<(), ArcError> {
        let request = HttpRequest::new(Method::Put, self.session_url(job, session_path)).body(data);
        expect_status(self.send(request).await?, 200)?;
        Ok(())
    }

    /// Streams the local file `source` into the job's session directory.
    pub async fn upload_file_from(&self, job: &JobId, session_path: &str, source: &Path) -> Result<(), ArcError> {
        let request = HttpRequest::new(Method::Put, self.session_url(job, session_path));
        expect_status(self.send_file(request, source).await?, 200)?;
        Ok(())
    }

    /// Streams one session file into `dest`.
    pub async fn download_file_to(&self, job: &JobId, session_path: &str, dest: &Path) -> Result<(), ArcError> {
        let request = HttpRequest::new(Method::Get, self.session_url(job, session_path));
        expect_status(self.receive_file(request, dest).await?, 200)?;
        Ok(())
    }

    /// Fetches one file from the job's session directory.
    pub async fn download_file(&self, job: &JobId, session_path: &str) -> Result<Vec<u8>, ArcError> {
        let request = HttpRequest::new(Method::Get, self.session_url(job, session_path));
        Ok(expect_status(self.send(request).await?, 200)?.body)
    }

    /// Lists one directory of the session area; `""` is the session root.
    pub async fn download_listing(&self, job: &JobId, session_path: &str) -> Result<SessionListing, ArcError> {
        let request = HttpRequest::new(Method::Get, self.session_url(job, session_path));
        let doc = parse_json(&expect_status(self.send_json(request).await?, 200)?)?;

        let names = |key: &str| -> Vec<String> {
            doc.get(key)
                .map(one_or_many)
                .unwrap_or_default()
                .into_iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        };
        Ok(SessionListing {
            files: names("file"),
            dirs: names("dir"),
        })
    }

    /// Fetches one control-directory file of the job.
    pub async fn download_diagnose(&self, job: &JobId, name: &str) -> Result<Vec<u8>, ArcError> {
        let request = self.diagnose_request(job, name)?;
        Ok(expect_status(self.send(request).await?, 200)?.body)
    }

    /// Streams one control-directory file into `dest`.
    pub async fn download_diagnose_to(&self, job: &JobId, name: &str, dest: &Path) -> Result<(), ArcError> {
        let request = self.diagnose_request(job, name)?;
        expect_status(self.receive_file(request, dest).await?, 200)?;
        Ok(())
    }

    fn diagnose_request(&self, job: &JobId, name: &str) -> Result<HttpRequest, ArcError> {
        if !is_diagnose_file(name) {
            return Err(ArcError::InvalidDiagnoseFile { name: name.to_string() });
        }
        Ok(HttpRequest::new(
            Method::Get,
            format!("{}/jobs/{}/diagnose/{}", self.api_path(), job, name),
        ))
    }
}
