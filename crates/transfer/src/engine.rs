//! Shared setup of upload and download worker pools.

use std::sync::Arc;

use ce::{ArcError, Connector};
use rest::ProtocolClient;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Default number of concurrent transfer workers per direction.
pub const DEFAULT_WORKERS: usize = 10;

/// Moves job files between the local filesystem and a CE.
///
/// Every worker talks to the CE over its own transport from the connector,
/// bound to the same API version as `client`.
#[derive(Clone)]
pub struct TransferEngine {
    client: ProtocolClient,
    connector: Arc<dyn Connector>,
    workers: usize,
}

impl TransferEngine {
    pub fn new(client: ProtocolClient, connector: Arc<dyn Connector>) -> Self {
        Self {
            client,
            connector,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Sets the maximum number of workers; at least one is always used.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Opens `count` independent worker clients.
    pub(crate) fn worker_clients(&self, count: usize) -> Result<Vec<ProtocolClient>, ArcError> {
        let clients = (0..count)
            .map(|_| Ok(self.client.with_transport(self.connector.connect()?)))
            .collect::<Result<Vec<_>, ArcError>>()?;
        debug!(workers = clients.len(), "created transfer workers");
        Ok(clients)
    }
}

/// Waits for every worker; a panicked worker is logged and otherwise ignored.
pub(crate) async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "transfer worker terminated abnormally");
        }
    }
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("client", &self.client)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}
