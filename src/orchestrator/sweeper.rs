//! Periodic sweeper: reaps stale jobs and ages out terminal records
//!
//! A job stuck in a non-terminal state past the configured wall-clock
//! deadline is cancelled, failed with `timeout`, and its workspace is
//! disposed. Completed jobs that were never fetched are disposed after
//! the same deadline. Cleaned records are eventually forgotten so the
//! table stays bounded over long uptimes.

use super::WorkshopDownloader;
use crate::types::JobState;
use chrono::Utc;

impl WorkshopDownloader {
    /// Spawn the periodic sweeper task. Runs until shutdown.
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(downloader.config.processing.sweep.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let reaped = downloader.sweep_once().await;
                        if reaped > 0 {
                            tracing::info!(reaped, "sweeper pass reaped stale jobs");
                        }
                    }
                    _ = downloader.shutdown_token.cancelled() => break,
                }
            }
        })
    }

    /// One sweeper pass. Returns how many jobs were acted on.
    pub async fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let deadline = self.config.download.job_timeout;
        let mut reaped = 0;

        for snapshot in self.registry.snapshots() {
            let id = snapshot.id;
            let age = now
                .signed_duration_since(snapshot.started_at)
                .to_std()
                .unwrap_or_default();

            if !snapshot.state.is_terminal() {
                if age > deadline {
                    // Stale in-flight job: cancel, fail once, dispose
                    let token = {
                        let mut active = self.admission.active.lock().await;
                        active.remove(&id)
                    };
                    if let Some(token) = token {
                        token.cancel();
                    }
                    if self.registry.fail(id, "timeout") {
                        self.logs.warn(
                            super::LOG_SOURCE,
                            format!("job {id} exceeded the stale deadline and was reaped"),
                        );
                    }
                    if let Some(path) = self.registry.take_workspace(id) {
                        if let Err(e) = self.workspaces.dispose(&path).await {
                            tracing::warn!(job_id = id.0, error = %e, "sweeper disposal failed");
                        }
                    }
                    reaped += 1;
                }
                continue;
            }

            // Terminal states: dispose never-fetched artifacts and age out
            // finished records past the same deadline.
            let finished_age = snapshot
                .finished_at
                .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default())
                .unwrap_or_default();

            match snapshot.state {
                JobState::Completed if age > deadline => {
                    if let Some(path) = self.registry.take_workspace(id) {
                        if let Err(e) = self.workspaces.dispose(&path).await {
                            tracing::warn!(job_id = id.0, error = %e, "sweeper disposal failed");
                        }
                    }
                    self.registry.mark_cleaned(id);
                    self.logs.info(
                        super::LOG_SOURCE,
                        format!("job {id} completed but never fetched; artifact disposed"),
                    );
                    reaped += 1;
                }
                JobState::Error if finished_age > deadline => {
                    if let Some(path) = self.registry.take_workspace(id) {
                        let _ = self.workspaces.dispose(&path).await;
                    }
                    self.registry.mark_cleaned(id);
                    reaped += 1;
                }
                JobState::Cleaned if finished_age > deadline => {
                    self.registry.forget(id);
                    reaped += 1;
                }
                _ => {}
            }
        }

        reaped
    }
}
