//! Domain crate for the ARC Computing Element (CE) REST client.
//!
//! This crate contains the identifiers, value types, errors, and port traits
//! shared by every other crate in the workspace, plus the pure rules that do
//! not need the network: matchmaking, output filtering, description
//! normalization, and local input resolution.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* the client needs from a transport, a signing service, and
//! a description compiler; infrastructure crates define *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`JobId`, `DelegationId`, `BatchRunId`) |
//! | [`types`] | Value types (`ApiVersion`, `JobState`, `JobInfo`, `Job`, `Delegation`) |
//! | [`errors`] | `ArcError` and its component error types |
//! | [`ports`] | `Transport`, `Connector`, `CertificateSigner`, `DescriptionCompiler` |
//! | [`matchmaking`] | Queue, walltime, and runtime checks against the CE info document |
//! | [`filter`] | Output-path filters for downloads |
//! | [`description`] | Description normalization and input source resolution |
//! | [`json`] | Singleton/list normalization for CE JSON documents |

pub mod description;
pub mod errors;
pub mod filter;
pub mod identifiers;
pub mod json;
pub mod matchmaking;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{ArcError, MatchmakingError, TransferError, TransportError};
pub use filter::OutputFilter;
pub use identifiers::{BatchRunId, DelegationId, JobId};
pub use ports::{
    CertificateSigner, Connector, DescriptionCompiler, HttpRequest, HttpResponse, InputFile,
    JobDescription, Method, OutputFile, RuntimeRequirement, Transport,
};
pub use types::{
    is_diagnose_file, ApiVersion, Delegation, DelegationKind, Job, JobInfo, JobState,
    SessionListing, Timestamp, DEFAULT_DIAGNOSE_DIR, DIAGNOSE_FILES, MAX_JOB_ERRORS,
};
