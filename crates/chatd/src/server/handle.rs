use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::{BroadcastReport, RegistryHandle};

/// Cloneable control handle for a running [`Server`](super::Server).
#[derive(Clone)]
pub struct ServerHandle {
    registry: RegistryHandle,
    shutdown: CancellationToken,
}

impl ServerHandle {
    pub(crate) fn new(registry: RegistryHandle, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }

    /// Delivers `message` to every registered session.
    ///
    /// Sessions whose delivery fails are torn down; the rest still receive it.
    pub async fn broadcast(&self, message: &str) -> BroadcastReport {
        self.registry.broadcast(message, None).await
    }

    /// Requests shutdown. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Shutdown requested through server handle");
        }
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }
}
