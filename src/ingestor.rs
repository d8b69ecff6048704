use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running ingestor task with its cancellation token
pub struct IngestorHandle {
    name: String,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl IngestorHandle {
    pub fn new(name: String, cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { name, cancel, join }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the task (socket, timers) and wait for it to finish
    pub async fn close(self) {
        info!("Closing ingestor {}", self.name);
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("Ingestor {} task failed: {}", self.name, e);
        }
    }
}
