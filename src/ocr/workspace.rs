//! Per-request workspace directories.
//!
//! Every request gets an exclusively-owned directory under the configured
//! root, holding the ingested input file and the engine's output subtree.
//! Removal is tied to [`Drop`], so the directory is gone on every exit path
//! out of the pipeline — success, validation failure, engine failure, or
//! timeout. Removal errors are logged, never surfaced: cleanup must not mask
//! the primary result.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::RequestId;

/// Creates workspaces under a configured root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh workspace directory for one request.
    ///
    /// The name combines the request id (microsecond timestamp) with a random
    /// suffix, so concurrent and sequential calls never collide.
    pub fn acquire(&self, request_id: &RequestId) -> io::Result<Workspace> {
        std::fs::create_dir_all(&self.root)?;
        let name = format!("chandra_{}_{}", request_id, Uuid::new_v4().simple());
        let path = self.root.join(name);
        std::fs::create_dir(&path)?;
        debug!("[{request_id}] created workspace {}", path.display());
        Ok(Workspace { path })
    }
}

/// An exclusively-owned request directory, removed recursively on drop.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deterministic location of the ingested input file.
    pub fn input_path(&self, ext: &str) -> PathBuf {
        self.path.join(format!("input.{ext}"))
    }

    /// Subdirectory the engine writes its artifacts into.
    pub fn output_dir(&self) -> PathBuf {
        self.path.join("output")
    }

    /// Remove the workspace without blocking the runtime.
    ///
    /// Consumes the workspace and defuses its `Drop`; `Drop` remains the
    /// safety net for paths that exit before reaching an explicit release.
    pub async fn release(mut self) {
        let path = std::mem::take(&mut self.path);
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove workspace {}: {e}", path.display());
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Empty path means release() already ran
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove workspace {}: {e}", self.path.display());
            }
        }
    }
}
