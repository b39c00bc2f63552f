//! In-memory fakes of the port traits for tests in this and downstream crates.
//!
//! Enabled for this crate's own tests and, for other crates, through the
//! `test-support` feature.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ce::{ArcError, CertificateSigner, Connector, HttpRequest, HttpResponse, Transport, TransportError};
use serde_json::Value;

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// A transport answering every request with a handler closure and recording
/// what it was sent.
pub struct FakeTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = (self.handler)(&request);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        // Let other tasks interleave the way they would around real I/O.
        tokio::task::yield_now().await;
        response
    }

    /// Records the request with the file contents as its body.
    async fn send_file(&self, request: HttpRequest, source: &Path) -> Result<HttpResponse, TransportError> {
        let data = tokio::fs::read(source).await.map_err(|e| file_error(source, e))?;
        self.send(request.body(data)).await
    }

    async fn receive_file(&self, request: HttpRequest, dest: &Path) -> Result<HttpResponse, TransportError> {
        let mut response = self.send(request).await?;
        if !(200..300).contains(&response.status) {
            return Ok(response);
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| file_error(parent, e))?;
        }
        let body = std::mem::take(&mut response.body);
        tokio::fs::write(dest, body).await.map_err(|e| file_error(dest, e))?;
        Ok(response)
    }
}

fn file_error(path: &Path, error: std::io::Error) -> TransportError {
    TransportError::File {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// A connector handing out the same fake transport and counting connections.
pub struct FakeConnector {
    transport: Arc<FakeTransport>,
    connections: AtomicUsize,
    fail: bool,
}

impl FakeConnector {
    pub fn new(transport: Arc<FakeTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            connections: AtomicUsize::new(0),
            fail: false,
        })
    }

    /// A connector whose every `connect` fails.
    pub fn failing(transport: Arc<FakeTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            connections: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        if self.fail {
            return Err(TransportError::Disconnected {
                message: "connection refused".into(),
            });
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

/// A signer that records every CSR and answers with a fixed certificate.
pub struct FakeSigner {
    certificate: Option<String>,
    signed: Mutex<Vec<String>>,
}

impl FakeSigner {
    pub fn ok(certificate: &str) -> Arc<Self> {
        Arc::new(Self {
            certificate: Some(certificate.to_string()),
            signed: Mutex::new(Vec::new()),
        })
    }

    /// A signer that rejects every request with an authentication error.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            certificate: None,
            signed: Mutex::new(Vec::new()),
        })
    }

    pub fn signed(&self) -> Vec<String> {
        self.signed.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl CertificateSigner for FakeSigner {
    fn sign(&self, csr_pem: &str, _lifetime: Option<Duration>) -> Result<String, ArcError> {
        if let Ok(mut signed) = self.signed.lock() {
            signed.push(csr_pem.to_string());
        }
        self.certificate.clone().ok_or_else(|| ArcError::Authentication {
            message: "no valid proxy credential".into(),
        })
    }
}

/// A response with a JSON body.
pub fn json_response(status: u16, body: Value) -> HttpResponse {
    let mut response = HttpResponse::new(status, body.to_string().into_bytes());
    response
        .headers
        .push(("Content-Type".into(), "application/json".into()));
    response
}
