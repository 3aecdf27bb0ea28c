//! Download orchestrator: admission, per-job pipelines, sweeping, shutdown
//!
//! The `WorkshopDownloader` struct and its methods are organized by domain:
//! - [`job_task`] - the per-job pipeline state machine
//! - [`sweeper`] - periodic reaping of stale jobs and residual workspaces
//! - [`lifecycle`] - graceful shutdown coordination

mod job_task;
mod lifecycle;
mod sweeper;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logbus::LogBus;
use crate::registry::ArtifactRegistry;
use crate::scraper::{parse_workshop_url, MetadataFetcher};
use crate::steamcmd::SteamCmd;
use crate::types::{JobId, JobSnapshot, SubmitReceipt};
use crate::workspace::WorkspaceManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Symbolic source tag used on the log bus
const LOG_SOURCE: &str = "orchestrator";

/// Admission and cancellation state shared across tasks
#[derive(Clone)]
pub(crate) struct AdmissionState {
    /// Slot permits; `try_acquire` rejects at the cap instead of queueing
    pub(crate) slots: Arc<tokio::sync::Semaphore>,
    /// Cancellation token per running job
    pub(crate) active: Arc<tokio::sync::Mutex<HashMap<JobId, CancellationToken>>>,
    /// Cleared during shutdown so new submissions are refused
    pub(crate) accepting_new: Arc<AtomicBool>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct WorkshopDownloader {
    /// Configuration (shared across tasks)
    pub(crate) config: Arc<Config>,
    /// Job table and artifact registry
    pub(crate) registry: ArtifactRegistry,
    /// Per-job scratch space owner
    pub(crate) workspaces: WorkspaceManager,
    /// External steam client adapter
    pub(crate) steam: Arc<SteamCmd>,
    /// Structured log ring + fan-out
    pub(crate) logs: LogBus,
    /// Metadata scraper contract
    pub(crate) metadata_fetcher: Arc<dyn MetadataFetcher>,
    /// Admission and cancellation state
    pub(crate) admission: AdmissionState,
    /// Fired once during shutdown; log subscribers watch it for closure
    pub(crate) shutdown_token: CancellationToken,
}

impl WorkshopDownloader {
    /// Create a new downloader instance.
    ///
    /// Creates the download root, sweeps workspaces left behind by a
    /// previous run (active jobs do not survive restarts), and resolves
    /// the steam client binary. The metadata fetcher is injected so
    /// embedders and tests can replace the HTML scraper.
    pub async fn new(config: Config, metadata_fetcher: Arc<dyn MetadataFetcher>) -> Result<Self> {
        config.validate()?;

        let logs = LogBus::new(config.logging.ring_capacity);
        let workspaces = WorkspaceManager::new(config.download.download_root.clone());
        workspaces.ensure_root().await?;
        let swept = workspaces.sweep_all().await?;
        if swept > 0 {
            logs.info(
                LOG_SOURCE,
                format!("startup sweep removed {swept} residual workspace entries"),
            );
        }

        let steam = Arc::new(SteamCmd::new(config.steam.clone(), logs.clone())?);

        let admission = AdmissionState {
            slots: Arc::new(tokio::sync::Semaphore::new(
                config.download.max_concurrent_downloads,
            )),
            active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        Ok(Self {
            config: Arc::new(config),
            registry: ArtifactRegistry::new(),
            workspaces,
            steam,
            logs,
            metadata_fetcher,
            admission,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Validate a submission, admit it, and start the pipeline.
    ///
    /// Returns immediately with a receipt; the pipeline runs on its own
    /// task. Rejection reasons: `invalid_url`, `invalid_item`,
    /// `wrong_application`, `capacity_exhausted`, `shutting_down`.
    pub async fn submit(&self, url: &str) -> Result<SubmitReceipt> {
        if !self.admission.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let item_id = parse_workshop_url(url)?;
        let metadata = self.metadata_fetcher.fetch(item_id).await?;
        if !metadata.valid {
            return Err(Error::InvalidItem(format!(
                "item {item_id} has no valid workshop page"
            )));
        }
        if metadata.app_id != self.config.steam.app_id {
            return Err(Error::WrongApplication {
                expected: self.config.steam.app_id,
                actual: metadata.app_id,
            });
        }

        // Admission: reject at the cap, never queue
        let max = self.config.download.max_concurrent_downloads;
        let permit = match self.admission.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let current = max - self.admission.slots.available_permits();
                return Err(Error::CapacityExhausted { current, max });
            }
        };

        let id = self.registry.create(item_id, metadata.clone());
        let cancel = CancellationToken::new();
        {
            let mut active = self.admission.active.lock().await;
            active.insert(id, cancel.clone());
        }

        self.logs.publish(
            crate::logbus::LogLevel::Info,
            LOG_SOURCE,
            format!("job {id} admitted for item {item_id} \"{}\"", metadata.title),
            Some(serde_json::json!({ "job_id": id.get(), "item_id": item_id.get() })),
        );

        let ctx = job_task::JobContext {
            downloader: self.clone(),
            id,
            item_id,
            cancel,
        };
        tokio::spawn(async move {
            job_task::run_job(ctx, permit).await;
        });

        Ok(SubmitReceipt {
            job_id: id,
            item_id,
            metadata,
            status_path: format!("/api/v1/downloads/{id}"),
        })
    }

    /// Immutable status snapshot of one job.
    pub fn status(&self, id: JobId) -> Option<JobSnapshot> {
        self.registry.snapshot(id)
    }

    /// Snapshots of every live job record, ordered by id.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.registry.snapshots()
    }

    /// Current admission occupancy: (slots in use, cap).
    pub fn occupancy(&self) -> (usize, usize) {
        let max = self.config.download.max_concurrent_downloads;
        (max - self.admission.slots.available_permits(), max)
    }

    /// Cancel a job (if running), dispose its workspace, and mark it
    /// Cleaned. Idempotent: repeating the call on a cleaned job is a
    /// no-op success. Unknown ids are `not_found`.
    pub async fn cleanup(&self, id: JobId) -> Result<()> {
        if self.registry.snapshot(id).is_none() {
            return Err(Error::NotFound(format!("job {id}")));
        }

        let token = {
            let mut active = self.admission.active.lock().await;
            active.remove(&id)
        };
        if let Some(token) = token {
            token.cancel();
        }

        // A still-running job passes through Error before Cleaned; the
        // state graph has no direct edge from the active states.
        if let Some(snapshot) = self.registry.snapshot(id) {
            if !snapshot.state.is_terminal() {
                self.registry.fail(id, "cancelled");
            }
        }

        if let Some(path) = self.registry.take_workspace(id) {
            self.workspaces.dispose(&path).await?;
        }
        if self.registry.mark_cleaned(id) {
            self.logs.info(LOG_SOURCE, format!("job {id} cleaned"));
        }
        Ok(())
    }

    /// Perform the one-time credentialed session bootstrap, consuming the
    /// configured second-factor code if present. A no-op in anonymous
    /// mode or when the session is already fresh.
    pub async fn bootstrap_session(&self) -> Result<()> {
        self.steam
            .ensure_session(&self.shutdown_token)
            .await
            .map_err(Error::Job)
    }

    /// The structured log bus (ring + live fan-out).
    pub fn logs(&self) -> &LogBus {
        &self.logs
    }

    /// The steam client adapter (session inspection).
    pub fn steam(&self) -> &SteamCmd {
        &self.steam
    }

    /// Current configuration.
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Spawn the REST API server in a background task.
    pub fn spawn_api_server(
        self: &Arc<Self>,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let downloader = self.clone();
        let config = self.config.clone();
        tokio::spawn(async move { crate::api::start_api_server(downloader, config).await })
    }

    /// Schedule the job record to be dropped after the archive has been
    /// delivered. Disposal first, then a short grace before the record
    /// vanishes so an immediate status poll still resolves.
    pub(crate) fn schedule_post_delivery_cleanup(&self, id: JobId) {
        let downloader = self.clone();
        tokio::spawn(async move {
            if let Some(path) = downloader.registry.take_workspace(id) {
                if let Err(e) = downloader.workspaces.dispose(&path).await {
                    tracing::warn!(job_id = id.0, error = %e, "post-delivery disposal failed");
                }
            }
            downloader.registry.mark_cleaned(id);
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            downloader.registry.forget(id);
        });
    }

    /// Remove a job's cancellation token once its task ends.
    pub(crate) async fn remove_from_active(&self, id: JobId) {
        let mut active = self.admission.active.lock().await;
        active.remove(&id);
    }
}
