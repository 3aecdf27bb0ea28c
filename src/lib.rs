//! # workshop-dl
//!
//! Backend library for Steam Workshop download services.
//!
//! Callers submit workshop item URLs for one configured application; the
//! service drives the external `steamcmd` tool to fetch the item content,
//! packages it into a ZIP archive, and serves the archive over a REST API
//! with byte-range support, live progress, and a streaming log channel.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - no CLI or UI, purely a crate for embedding
//! - **Bounded** - a hard concurrency cap; submissions past it are
//!   rejected, never queued
//! - **Supervised** - the external client runs under deadlines, in its
//!   own process group, with every workspace disposed on every exit path
//! - **Ephemeral** - active jobs do not survive a restart; leftover
//!   workspaces are swept at startup
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use workshop_dl::{Config, HttpMetadataFetcher, WorkshopDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let downloader = Arc::new(
//!         WorkshopDownloader::new(config, Arc::new(HttpMetadataFetcher::new())).await?,
//!     );
//!
//!     downloader.bootstrap_session().await?;
//!     let _sweeper = downloader.start_sweeper();
//!     let _server = downloader.spawn_api_server();
//!
//!     workshop_dl::run_with_shutdown(&downloader).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Archive builder
pub mod archive;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Log Bus: bounded ring with live fan-out
pub mod logbus;
/// Download orchestrator
pub mod orchestrator;
/// Artifact registry
pub mod registry;
/// Retry logic with linear backoff
pub mod retry;
/// Workshop URL parsing and the metadata scraper contract
pub mod scraper;
/// Steam session state
pub mod session;
/// External steam client adapter
pub mod steamcmd;
/// Core types
pub mod types;
/// Per-job workspace management
pub mod workspace;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, Error, ErrorDetail, JobError, Result, ToHttpStatus};
pub use logbus::{LogBus, LogLevel, LogRecord};
pub use orchestrator::WorkshopDownloader;
pub use registry::ArtifactRegistry;
pub use scraper::{parse_workshop_url, HttpMetadataFetcher, MetadataFetcher};
pub use steamcmd::{FetchOutcome, SteamCmd};
pub use types::{
    ItemId, JobId, JobSnapshot, JobState, SecondFactorKind, SubmitReceipt, WorkshopItem,
};
pub use workspace::WorkspaceManager;

use std::sync::Arc;

/// Run until a termination signal arrives, then shut the downloader down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to
///   `tokio::signal::ctrl_c` if handler registration fails.
/// - **Windows/other:** listens for Ctrl+C.
pub async fn run_with_shutdown(downloader: &Arc<WorkshopDownloader>) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    // Registration can fail in restricted environments; fall back rather
    // than refusing to run
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        _ => {
            tracing::warn!("signal handler registration failed, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}
