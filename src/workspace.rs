//! Workspace management: per-job scratch trees under the download root
//!
//! Every job gets a directory named after its id. The steam client writes
//! content somewhere inside it, the archive is produced next to it, and
//! the whole tree is removed on every exit path (terminal states, sweeps,
//! and a startup sweep that clears residue from previous runs).

use crate::error::{Error, Result};
use crate::types::{ItemId, JobId};
use std::path::{Path, PathBuf};

/// Owner of all per-job scratch space
#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`. The directory itself is created
    /// lazily by [`WorkspaceManager::ensure_root`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if missing.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create download root '{}': {e}", self.root.display()),
            ))
        })
    }

    /// The workspace path a job would get, without creating it.
    pub fn path_for(&self, id: JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Create (idempotently) and return the workspace for a job.
    pub async fn allocate(&self, id: JobId) -> Result<PathBuf> {
        let path = self.path_for(id);
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create workspace '{}': {e}", path.display()),
            ))
        })?;
        Ok(path)
    }

    /// Remove a workspace tree. Disposal of an already-absent tree is not
    /// an error so every caller can dispose unconditionally.
    ///
    /// Refuses paths outside the root: all workspace paths handed around
    /// the pipeline are borrowed from this manager.
    pub async fn dispose(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.root) {
            return Err(Error::Internal(format!(
                "refusing to dispose '{}' outside download root",
                path.display()
            )));
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Remove every entry under the root. Run at startup: active jobs do
    /// not survive a restart, so anything on disk is residue.
    pub async fn sweep_all(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let path = entry.path();
            let result = if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "startup sweep failed to remove entry");
                }
            }
        }
        Ok(removed)
    }
}

/// Locate produced item content inside a workspace.
///
/// Tries, in order: the canonical steam layout, the layout without the
/// `steamapps` prefix, then the layout without the app id segment. The
/// first non-empty directory wins. The workspace root itself is never
/// accepted: it also holds steam client metadata, and archiving it would
/// ship unrelated files.
pub fn find_content(workspace: &Path, app_id: u32, item: ItemId) -> Option<PathBuf> {
    let candidates = [
        workspace
            .join("steamapps")
            .join("workshop")
            .join("content")
            .join(app_id.to_string())
            .join(item.to_string()),
        workspace
            .join("workshop")
            .join("content")
            .join(app_id.to_string())
            .join(item.to_string()),
        workspace
            .join("steamapps")
            .join("workshop")
            .join("content")
            .join(item.to_string()),
    ];

    candidates.into_iter().find(|path| dir_non_empty(path))
}

fn dir_non_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}
