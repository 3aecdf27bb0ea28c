//! Application state for the API server

use crate::config::Config;
use crate::orchestrator::WorkshopDownloader;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (cheap Arc clones).
#[derive(Clone)]
pub struct AppState {
    /// The main WorkshopDownloader instance
    pub downloader: Arc<WorkshopDownloader>,

    /// Configuration (read access)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(downloader: Arc<WorkshopDownloader>, config: Arc<Config>) -> Self {
        Self { downloader, config }
    }
}
