//! reqwest implementation of the transport port.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ce::{Connector, HttpRequest, HttpResponse, Method, Transport, TransportError};
use futures_util::StreamExt;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client, ClientBuilder, Identity, Response};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::TransportConfig;
use crate::retry::{retry_once, AttemptError};

/// One HTTPS connection pool to a CE.
#[derive(Clone)]
pub struct HttpsTransport {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpsTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = ClientBuilder::new().use_rustls_tls();
        if let Some(pem) = &config.identity_pem {
            let identity = Identity::from_pem(pem).map_err(|e| TransportError::Tls {
                message: format!("invalid client identity: {e}"),
            })?;
            builder = builder.identity(identity);
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| TransportError::Tls {
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
        })
    }

    fn url(&self, request: &HttpRequest) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&request.path);
        url.set_query(None);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        url
    }

    /// Request line and headers; the caller attaches the body.
    fn build(&self, request: &HttpRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };
        let mut builder = self.client.request(method, self.url(request));
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::Request {
                message: format!("invalid header name {name}: {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| TransportError::Request {
                message: format!("invalid value for header {name}: {e}"),
            })?;
            builder = builder.header(name, value);
        }
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(builder)
    }

    async fn attempt(&self, request: &HttpRequest) -> Result<HttpResponse, AttemptError> {
        let builder = self.build(request).map_err(AttemptError::Local)?;
        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| AttemptError::from_reqwest(&e))?;
        buffered(response).await
    }

    /// Each attempt reopens `source`, so a retry sends the file from the start.
    async fn send_file_attempt(&self, request: &HttpRequest, source: &Path) -> Result<HttpResponse, AttemptError> {
        let file = File::open(source).await.map_err(|e| local_error(source, &e))?;
        let length = file.metadata().await.map_err(|e| local_error(source, &e))?.len();
        let builder = self.build(request).map_err(AttemptError::Local)?;
        let response = builder
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| AttemptError::from_reqwest(&e))?;
        buffered(response).await
    }

    async fn receive_file_attempt(&self, request: &HttpRequest, dest: &Path) -> Result<HttpResponse, AttemptError> {
        let builder = self.build(request).map_err(AttemptError::Local)?;
        let response = builder.send().await.map_err(|e| AttemptError::from_reqwest(&e))?;
        if !response.status().is_success() {
            return buffered(response).await;
        }

        let status = response.status().as_u16();
        let headers = response_headers(&response);
        match write_body(response, dest).await {
            Ok(bytes) => {
                debug!(bytes, dest = %dest.display(), "response body written");
                Ok(HttpResponse {
                    status,
                    headers,
                    body: Vec::new(),
                })
            }
            Err(e) => {
                match tokio::fs::remove_file(dest).await {
                    Err(remove) if remove.kind() != std::io::ErrorKind::NotFound => {
                        warn!(dest = %dest.display(), error = %remove, "could not remove partial download");
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }
}

fn response_headers(response: &Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

async fn buffered(response: Response) -> Result<HttpResponse, AttemptError> {
    let status = response.status().as_u16();
    let headers = response_headers(&response);
    let body = response.bytes().await.map_err(|e| AttemptError::from_reqwest(&e))?;
    Ok(HttpResponse {
        status,
        headers,
        body: body.to_vec(),
    })
}

/// Copies the body chunk by chunk into `dest`, truncating any earlier content.
async fn write_body(response: Response, dest: &Path) -> Result<u64, AttemptError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| local_error(parent, &e))?;
    }
    let mut file = File::create(dest).await.map_err(|e| local_error(dest, &e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AttemptError::from_reqwest(&e))?;
        file.write_all(&chunk).await.map_err(|e| local_error(dest, &e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| local_error(dest, &e))?;
    Ok(written)
}

fn local_error(path: &Path, error: &std::io::Error) -> AttemptError {
    AttemptError::Local(TransportError::File {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

#[async_trait]
impl Transport for HttpsTransport {
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = retry_once(|| self.attempt(&request)).await?;
        debug!(status = response.status, bytes = response.body.len(), "response received");
        Ok(response)
    }

    #[instrument(skip_all, fields(method = %request.method, path = %request.path, source = %source.display()))]
    async fn send_file(&self, request: HttpRequest, source: &Path) -> Result<HttpResponse, TransportError> {
        let response = retry_once(|| self.send_file_attempt(&request, source)).await?;
        debug!(status = response.status, "file sent");
        Ok(response)
    }

    #[instrument(skip_all, fields(method = %request.method, path = %request.path, dest = %dest.display()))]
    async fn receive_file(&self, request: HttpRequest, dest: &Path) -> Result<HttpResponse, TransportError> {
        let response = retry_once(|| self.receive_file_attempt(&request, dest)).await?;
        debug!(status = response.status, "file received");
        Ok(response)
    }
}

/// Opens a fresh [`HttpsTransport`] per call.
#[derive(Debug, Clone)]
pub struct HttpsConnector {
    config: TransportConfig,
}

impl HttpsConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl Connector for HttpsConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(HttpsTransport::new(&self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    fn transport() -> HttpsTransport {
        let config = TransportConfig::new("https://ce.example.org:443/ignored").unwrap();
        HttpsTransport::new(&config).unwrap()
    }

    #[test]
    fn url_combines_endpoint_path_and_query() {
        let request = HttpRequest::new(Method::Post, "/arex/rest/1.1/jobs")
            .query("action", "new")
            .query("queue", "grid long");
        assert_eq!(
            transport().url(&request).as_str(),
            "https://ce.example.org/arex/rest/1.1/jobs?action=new&queue=grid+long"
        );
    }

    #[test]
    fn url_without_query_has_no_question_mark() {
        let request = HttpRequest::new(Method::Get, "/arex/rest");
        assert_eq!(transport().url(&request).as_str(), "https://ce.example.org/arex/rest");
    }

    #[test]
    fn invalid_identity_is_a_tls_error() {
        let mut config = TransportConfig::new("https://ce.example.org").unwrap();
        config.identity_pem = Some(b"not a pem".to_vec());
        assert!(matches!(HttpsTransport::new(&config), Err(TransportError::Tls { .. })));
    }

    #[test]
    fn connector_opens_independent_transports() {
        let connector = HttpsConnector::new(TransportConfig::new("https://ce.example.org").unwrap());
        let a = connector.connect().unwrap();
        let b = connector.connect().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    /// Accepts one connection, answers it with `reply`, and hands back the
    /// raw request.
    async fn serve_once(reply: &'static str) -> (TransportConfig, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = TransportConfig::new(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&raw) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            raw
        });
        (config, server)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    #[tokio::test]
    async fn send_file_streams_the_file_as_body() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input.dat");
        std::fs::write(&source, b"file contents").unwrap();
        let (config, server) = serve_once("HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;

        let request = HttpRequest::new(Method::Put, "/arex/rest/1.1/jobs/j1/session/input.dat");
        let response = HttpsTransport::new(&config).unwrap().send_file(request, &source).await.unwrap();

        assert_eq!(response.status, 200);
        let raw = String::from_utf8(server.await.unwrap()).unwrap();
        assert!(raw.starts_with("PUT /arex/rest/1.1/jobs/j1/session/input.dat HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("content-length: 13"));
        assert!(raw.ends_with("\r\n\r\nfile contents"));
    }

    #[tokio::test]
    async fn send_file_without_source_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let request = HttpRequest::new(Method::Put, "/arex/rest/1.1/jobs/j1/session/x");
        let err = transport()
            .send_file(request, &dir.path().join("absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::File { path, .. } if path.ends_with("absent")));
    }

    #[tokio::test]
    async fn receive_file_writes_the_body_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("j1/out/stdout");
        let (config, _server) = serve_once("HTTP/1.1 200 OK\r\ncontent-length: 11\r\n\r\njob output\n").await;

        let request = HttpRequest::new(Method::Get, "/arex/rest/1.1/jobs/j1/session/stdout");
        let response = HttpsTransport::new(&config).unwrap().receive_file(request, &dest).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "job output\n");
    }

    #[tokio::test]
    async fn receive_file_keeps_error_bodies_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stdout");
        let (config, _server) = serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 9\r\n\r\nno such f").await;

        let request = HttpRequest::new(Method::Get, "/arex/rest/1.1/jobs/j1/session/stdout");
        let response = HttpsTransport::new(&config).unwrap().receive_file(request, &dest).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.text(), "no such f");
        assert!(!dest.exists());
    }

    #[test]
    fn bad_header_is_rejected_before_sending() {
        let request = HttpRequest::new(Method::Get, "/arex/rest").header("Bad Header", "x");
        assert!(matches!(transport().build(&request), Err(TransportError::Request { .. })));
    }
}
