//! Artifact registry: the process-resident table of job records
//!
//! The registry owns every [`Job`]; the orchestrator mutates records
//! through it and status callers receive immutable snapshots. State
//! transitions are validated against the job state graph here, so an
//! illegal transition can never be observed regardless of which task
//! attempts it. Progress is monotonic within an attempt; only
//! [`ArtifactRegistry::begin_attempt`] may reset it.

use crate::types::{Job, JobId, JobSnapshot, JobState, ItemId, WorkshopItem};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Shared job table (cheap to clone)
#[derive(Clone)]
pub struct ArtifactRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    next_id: Arc<AtomicU64>,
}

impl ArtifactRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Insert a new job in the Starting state and return its id.
    pub fn create(&self, item_id: ItemId, metadata: WorkshopItem) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let job = Job {
            id,
            item_id,
            state: JobState::Starting,
            progress: 0,
            attempt: 1,
            workspace: None,
            archive_path: None,
            archive_size: None,
            metadata,
            last_error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.insert(id, job);
        }
        id
    }

    /// Immutable snapshot of one job.
    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs
            .read()
            .ok()
            .and_then(|jobs| jobs.get(&id).map(Job::snapshot))
    }

    /// Snapshots of every live job, ordered by id.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut all: Vec<JobSnapshot> = self
            .jobs
            .read()
            .map(|jobs| jobs.values().map(Job::snapshot).collect())
            .unwrap_or_default();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Read access to one record.
    pub fn with_job<R>(&self, id: JobId, f: impl FnOnce(&Job) -> R) -> Option<R> {
        self.jobs.read().ok().and_then(|jobs| jobs.get(&id).map(f))
    }

    /// Apply a validated state transition. Illegal transitions are
    /// ignored and reported; the record stays untouched.
    pub fn set_state(&self, id: JobId, next: JobState) -> bool {
        let Ok(mut jobs) = self.jobs.write() else {
            return false;
        };
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if !job.state.can_transition_to(next) {
            tracing::warn!(
                job_id = id.0,
                from = %job.state,
                to = %next,
                "ignoring illegal state transition"
            );
            return false;
        }
        job.state = next;
        if next.is_terminal() && job.finished_at.is_none() {
            job.finished_at = Some(Utc::now());
        }
        true
    }

    /// Raise the progress value. Values below the current one are ignored
    /// so progress stays monotonic within an attempt.
    pub fn set_progress(&self, id: JobId, value: u8) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(job) = jobs.get_mut(&id) {
                let capped = value.min(100);
                if capped > job.progress {
                    job.progress = capped;
                }
            }
        }
    }

    /// Start a new retrieval attempt: bump the counter and reset progress.
    /// This is the only legal way progress moves backwards.
    pub fn begin_attempt(&self, id: JobId, attempt: u32) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(job) = jobs.get_mut(&id) {
                job.attempt = attempt;
                job.progress = 0;
            }
        }
    }

    /// Record the workspace allocated for a job.
    pub fn set_workspace(&self, id: JobId, path: PathBuf) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(job) = jobs.get_mut(&id) {
                job.workspace = Some(path);
            }
        }
    }

    /// Record the produced archive. Must happen before the transition to
    /// Completed so a Completed snapshot always carries the artifact.
    pub fn register_archive(&self, id: JobId, path: PathBuf, size: u64) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(job) = jobs.get_mut(&id) {
                job.archive_path = Some(path);
                job.archive_size = Some(size);
            }
        }
    }

    /// Move a job to Error with a stable failure code.
    pub fn fail(&self, id: JobId, code: &str) -> bool {
        let Ok(mut jobs) = self.jobs.write() else {
            return false;
        };
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if !job.state.can_transition_to(JobState::Error) {
            return false;
        }
        job.state = JobState::Error;
        job.last_error = Some(code.to_string());
        job.finished_at = Some(Utc::now());
        true
    }

    /// Mark a job Cleaned after its workspace was disposed.
    pub fn mark_cleaned(&self, id: JobId) -> bool {
        let Ok(mut jobs) = self.jobs.write() else {
            return false;
        };
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if !job.state.can_transition_to(JobState::Cleaned) {
            return false;
        }
        job.state = JobState::Cleaned;
        job.workspace = None;
        job.archive_path = None;
        job.archive_size = None;
        if job.finished_at.is_none() {
            job.finished_at = Some(Utc::now());
        }
        true
    }

    /// Detach and return the workspace path, if the job still has one.
    /// Used by disposal paths so no two of them race on the same tree.
    pub fn take_workspace(&self, id: JobId) -> Option<PathBuf> {
        self.jobs
            .write()
            .ok()
            .and_then(|mut jobs| jobs.get_mut(&id).and_then(|job| job.workspace.take()))
    }

    /// Remove a record entirely, returning it.
    pub fn forget(&self, id: JobId) -> Option<Job> {
        self.jobs.write().ok().and_then(|mut jobs| jobs.remove(&id))
    }

    /// Number of jobs currently holding a concurrency slot.
    pub fn count_active(&self) -> usize {
        self.jobs
            .read()
            .map(|jobs| jobs.values().filter(|j| j.state.is_active()).count())
            .unwrap_or(0)
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}
