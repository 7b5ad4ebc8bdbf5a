use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::TokioTaskSpawner;

/// Graceful shutdown coordinator for the application broker
///
/// Background provision/deprovision tasks cannot be cancelled. Shutdown waits
/// for them up to a timeout; whatever is still running afterwards is picked up
/// by the populator on the next start.
pub struct ShutdownCoordinator {
    spawner: TokioTaskSpawner,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(spawner: TokioTaskSpawner, timeout: Duration) -> Self {
        Self { spawner, timeout }
    }

    /// Wait for SIGINT (Ctrl-C)
    pub async fn wait_for_signal() -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on Ctrl-C");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        Ok(())
    }

    /// Drain background work. Returns false when tasks were still running at the timeout.
    pub async fn shutdown(&self) -> bool {
        let in_flight = self.spawner.in_flight();
        info!(in_flight, timeout_ms = self.timeout.as_millis() as u64, "Initiating graceful shutdown");

        if self.spawner.wait_idle(self.timeout).await {
            info!("Graceful shutdown completed successfully");
            true
        } else {
            warn!(
                remaining = self.spawner.in_flight(),
                "Timeout waiting for background tasks, they will be resumed on next start"
            );
            false
        }
    }
}
