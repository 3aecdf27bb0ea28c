//! Core types for workshop-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

/// Unique identifier for a download job
///
/// Opaque and unique for the lifetime of the process. Jobs are not
/// persisted across restarts, so ids restart from 1 on each launch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Workshop item identifier as extracted from a `?id=<digits>` URL
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a download job
///
/// Transitions form a directed acyclic path; see [`JobState::can_transition_to`].
/// Any non-terminal state may fail into [`JobState::Error`]. There are no
/// back-edges: a retry within the Downloading phase does not re-enter
/// earlier states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Admitted; workspace not yet created
    Starting,
    /// Workspace created, about to invoke the steam client
    Preparing,
    /// Steam client running (retries stay inside this state)
    Downloading,
    /// Content verified; archive build in progress
    CreatingArchive,
    /// Archive produced and registered for delivery
    Completed,
    /// Terminal failure; reason recorded in `last_error`
    Error,
    /// Workspace (and archive, if any) removed
    Cleaned,
}

impl JobState {
    /// Whether no further pipeline work happens in this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Error | JobState::Cleaned)
    }

    /// Whether the job currently occupies a concurrency slot
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Preparing | JobState::Downloading | JobState::CreatingArchive
        )
    }

    /// Validate a transition against the state graph.
    ///
    /// Forward edges only: Starting → Preparing → Downloading →
    /// CreatingArchive → Completed → Cleaned. Every non-terminal state may
    /// move to Error, and Error may move to Cleaned once its workspace is
    /// disposed.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Starting, Preparing)
            | (Preparing, Downloading)
            | (Downloading, CreatingArchive)
            | (CreatingArchive, Completed)
            | (Completed, Cleaned)
            | (Error, Cleaned) => true,
            (s, Error) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Starting => "starting",
            JobState::Preparing => "preparing",
            JobState::Downloading => "downloading",
            JobState::CreatingArchive => "creating_archive",
            JobState::Completed => "completed",
            JobState::Error => "error",
            JobState::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

/// Kind of second factor the steam client is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecondFactorKind {
    /// Steam Guard code delivered by email
    Email,
    /// Code from the mobile authenticator app
    Mobile,
}

impl std::fmt::Display for SecondFactorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecondFactorKind::Email => f.write_str("email"),
            SecondFactorKind::Mobile => f.write_str("mobile"),
        }
    }
}

/// Metadata snapshot for a workshop item, as reported by the scraper
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkshopItem {
    /// Item identifier on the workshop
    pub item_id: ItemId,

    /// Application id the item belongs to
    pub app_id: u32,

    /// Item title
    pub title: String,

    /// Author display name
    pub author: Option<String>,

    /// Preview image URL, when the page carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,

    /// Declared content size in bytes, when the page carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_size: Option<u64>,

    /// Whether the scraper considers the item page valid
    pub valid: bool,
}

/// Immutable status snapshot of a job, as returned by the status endpoint
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct JobSnapshot {
    /// Job identifier
    pub id: JobId,

    /// Workshop item identifier
    pub item_id: ItemId,

    /// Current lifecycle state
    pub state: JobState,

    /// Progress percentage (0–100, monotonic within an attempt)
    pub progress: u8,

    /// Retrieval attempt currently in flight (1-based)
    pub attempt: u32,

    /// Item metadata captured at submission
    pub metadata: WorkshopItem,

    /// Archive size in bytes; present only once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_size: Option<u64>,

    /// Relative URL for fetching the archive; present only once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Stable failure code; present only in the Error state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the job was admitted
    pub started_at: DateTime<Utc>,

    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Response returned by a successful submission
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitReceipt {
    /// Identifier assigned to the new job
    pub job_id: JobId,

    /// Workshop item identifier parsed from the URL
    pub item_id: ItemId,

    /// Metadata snapshot captured at submission
    pub metadata: WorkshopItem,

    /// Relative URL for polling job status
    pub status_path: String,
}

/// Events produced by the steam client adapter while a fetch is running.
///
/// The adapter holds no reference to the job; the orchestrator consumes
/// these over a channel and is the only writer of job state.
#[derive(Clone, Debug)]
pub enum AdapterEvent {
    /// One line of steam client output (already trimmed)
    OutputLine(String),
    /// A download-activity marker was observed in the output
    DownloadTick,
}

/// Internal full job record owned by the registry.
///
/// Not serialized; API callers only ever see [`JobSnapshot`] copies.
#[derive(Clone, Debug)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Workshop item identifier
    pub item_id: ItemId,
    /// Current state
    pub state: JobState,
    /// Progress percentage
    pub progress: u8,
    /// Retrieval attempt in flight (1-based)
    pub attempt: u32,
    /// Scratch directory, present in non-terminal states and until swept
    pub workspace: Option<PathBuf>,
    /// Produced archive, present iff Completed and the file exists
    pub archive_path: Option<PathBuf>,
    /// Archive size in bytes, set together with `archive_path`
    pub archive_size: Option<u64>,
    /// Metadata captured at submission
    pub metadata: WorkshopItem,
    /// Stable failure code for the Error state
    pub last_error: Option<String>,
    /// Admission time
    pub started_at: DateTime<Utc>,
    /// Terminal-state time
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build the immutable snapshot served to status callers.
    pub fn snapshot(&self) -> JobSnapshot {
        let download_url = if self.state == JobState::Completed {
            Some(format!("/api/v1/downloads/{}/file", self.id))
        } else {
            None
        };
        JobSnapshot {
            id: self.id,
            item_id: self.item_id,
            state: self.state,
            progress: self.progress,
            attempt: self.attempt,
            metadata: self.metadata.clone(),
            archive_size: self.archive_size,
            download_url,
            last_error: self.last_error.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
