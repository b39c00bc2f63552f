//! File transfer for the ARC CE REST client.
//!
//! [`TransferEngine`] moves job files with a pool of concurrent workers, each
//! over its own connection:
//!
//! - **Upload** is static: every local input is known up front, so workers
//!   drain a fixed pool and stop when it is empty.
//! - **Download** is dynamic: listing a directory produces more work. Workers
//!   share a [`TaskQueue`] that only reports exhaustion once every worker is
//!   idle at the same time.
//!
//! Both directions report one error list per job, in request order. A failed
//! upload cancels the rest of that job's uploads; other jobs are unaffected.

mod download;
mod engine;
pub mod queue;
mod task;
mod upload;

pub use download::DownloadJob;
pub use engine::{TransferEngine, DEFAULT_WORKERS};
pub use queue::TaskQueue;
pub use task::{TransferKind, TransferTask};
