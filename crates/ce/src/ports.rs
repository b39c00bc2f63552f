//! Port traits for the collaborators the client depends on but does not own.
//!
//! | Port | Implemented by |
//! |------|----------------|
//! | [`Transport`], [`Connector`] | the `transport` crate (reqwest), test fakes |
//! | [`CertificateSigner`] | an external proxy-signing service |
//! | [`DescriptionCompiler`] | an external job-description language library |
//!
//! The protocol, transfer, and submission crates only see these traits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ArcError, DelegationId, TransportError};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// HTTP method used by the REST interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to the CE, relative to the transport's endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute path on the CE host, e.g. `/arex/rest/1.1/jobs`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request with no headers, query parameters, or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of a header, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A complete response from the CE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Returns the first value of a header, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends requests to one CE endpoint over one connection.
///
/// Implementations retry exactly once, transparently, when they detect that
/// the connection was dropped by the peer. Any other failure, or a second
/// dropped connection, is returned to the caller. Non-success HTTP statuses are
/// ordinary responses, not errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Sends `request` with the contents of the local file `source` as its
    /// body, read incrementally rather than loaded whole. `request.body` is
    /// ignored.
    async fn send_file(&self, request: HttpRequest, source: &Path) -> Result<HttpResponse, TransportError>;

    /// Sends `request` and writes a 2xx response body incrementally into
    /// `dest`, creating its parent directories. The returned response then has
    /// an empty body. Any other status leaves `dest` untouched and carries its
    /// body in memory like [`Transport::send`].
    async fn receive_file(&self, request: HttpRequest, dest: &Path) -> Result<HttpResponse, TransportError>;
}

/// Opens independent transports to the same endpoint.
///
/// Each transfer worker gets its own transport so workers never contend for a
/// shared connection.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Transport>, TransportError>;
}

// ---------------------------------------------------------------------------
// Certificate signing
// ---------------------------------------------------------------------------

/// Signs delegation certificate requests with the user's proxy credential.
pub trait CertificateSigner: Send + Sync {
    /// Signs a PEM certificate signing request and returns the PEM-encoded
    /// signed certificate followed by the issuer chain.
    fn sign(&self, csr_pem: &str, lifetime: Option<Duration>) -> Result<String, ArcError>;
}

// ---------------------------------------------------------------------------
// Job descriptions
// ---------------------------------------------------------------------------

/// An input file staging entry of a job description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Name relative to the session directory.
    pub name: String,
    /// First declared source URL, if any. `None` means a local file named
    /// like the entry.
    pub source: Option<String>,
}

impl InputFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
        }
    }
}

/// An output file staging entry of a job description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Name relative to the session directory; directories end with `/`.
    pub name: String,
}

impl OutputFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A requested runtime environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeRequirement {
    pub name: String,
    pub version: Option<String>,
}

impl std::fmt::Display for RuntimeRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}-{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// Field access into a parsed job description.
///
/// Paths are `None` when the description does not set them.
pub trait JobDescription {
    fn executable(&self) -> Option<&str>;
    fn stdin(&self) -> Option<&str>;
    fn stdout(&self) -> Option<&str>;
    fn stderr(&self) -> Option<&str>;
    fn log_dir(&self) -> Option<&str>;

    fn queue(&self) -> Option<&str>;
    fn set_queue(&mut self, queue: &str);

    fn runtimes(&self) -> Vec<RuntimeRequirement>;

    /// Requested walltime in seconds.
    fn walltime(&self) -> Option<u64>;

    fn set_delegation_id(&mut self, id: &DelegationId);

    fn input_files(&self) -> &[InputFile];
    fn input_files_mut(&mut self) -> &mut Vec<InputFile>;
    fn output_files(&self) -> &[OutputFile];
    fn output_files_mut(&mut self) -> &mut Vec<OutputFile>;
}

/// Parses and serialises job descriptions.
pub trait DescriptionCompiler: Send + Sync {
    type Description: JobDescription + Send;

    fn parse(&self, text: &str) -> Result<Self::Description, ArcError>;

    fn unparse(&self, description: &Self::Description) -> Result<String, ArcError>;

    /// MIME type of the bulk document sent to the CE.
    fn content_type(&self) -> &'static str {
        "application/xml"
    }

    /// Joins individually unparsed descriptions into one bulk document.
    ///
    /// The default handles ADL: anything before `<ActivityDescription` (such
    /// as an XML declaration) is dropped, and more than one description is
    /// wrapped in `<ActivityDescriptions>`.
    fn merge(&self, descriptions: &[String]) -> String {
        let mut bulk = String::new();
        for description in descriptions {
            let start = description.find("<ActivityDescription").unwrap_or(0);
            bulk.push_str(&description[start..]);
        }
        if descriptions.len() > 1 {
            bulk = format!("<ActivityDescriptions>{bulk}</ActivityDescriptions>");
        }
        bulk
    }
}
