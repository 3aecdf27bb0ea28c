//! Graceful shutdown coordination.

use super::WorkshopDownloader;
use crate::error::Result;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// How long shutdown waits for cancelled jobs to unwind
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

impl WorkshopDownloader {
    /// Gracefully shut down the downloader:
    /// 1. Stop accepting new submissions
    /// 2. Cancel all in-flight jobs via their tokens
    /// 3. Wait (bounded) for job tasks to unwind and dispose their trees
    /// 4. Dispose any workspaces still on disk
    /// 5. Signal log subscribers to close
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");
        self.admission.accepting_new.store(false, Ordering::SeqCst);

        {
            let active = self.admission.active.lock().await;
            tracing::debug!(active_count = active.len(), "cancelling in-flight jobs");
            for (id, token) in active.iter() {
                tracing::debug!(job_id = id.0, "signalling cancellation");
                token.cancel();
            }
        }

        let drained =
            tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.wait_for_active_jobs()).await;
        if drained.is_err() {
            tracing::warn!("timeout waiting for jobs to unwind, proceeding with shutdown");
        }

        // Cancelled tasks dispose their own trees; this catches any branch
        // that didn't get there before the drain timeout.
        for snapshot in self.registry.snapshots() {
            if let Some(path) = self.registry.take_workspace(snapshot.id) {
                if let Err(e) = self.workspaces.dispose(&path).await {
                    tracing::warn!(job_id = snapshot.id.0, error = %e, "shutdown disposal failed");
                }
            }
        }

        self.logs.info(super::LOG_SOURCE, "shutting down");
        self.shutdown_token.cancel();

        tracing::info!("graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_jobs(&self) {
        loop {
            let active_count = {
                let active = self.admission.active.lock().await;
                active.len()
            };
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "waiting for job tasks to unwind");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
