//! Per-attempt working directories.
//!
//! A [`JobWorkspace`] is owned by exactly one attempt. It is removed when
//! closed or dropped, which covers early returns, timeouts and the attempt
//! future being aborted. Directories left behind by a crashed process are
//! collected by [`sweep_stale`] at worker startup.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::types::ModelId;

const PREFIX: &str = "model_";

#[derive(Debug)]
pub struct JobWorkspace {
    model_id: ModelId,
    dir: TempDir,
}

impl JobWorkspace {
    /// Create `model_<id>_<random>` under `root` with its `images/`,
    /// `cache/` and `output/` subdirectories.
    pub fn create(root: &Path, model_id: ModelId) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{PREFIX}{model_id}_"))
            .tempdir_in(root)?;

        let workspace = Self { model_id, dir };
        std::fs::create_dir(workspace.images_dir())?;
        std::fs::create_dir(workspace.cache_dir())?;
        std::fs::create_dir(workspace.output_dir())?;
        Ok(workspace)
    }

    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the downloaded input archive is written.
    pub fn archive_path(&self) -> PathBuf {
        self.path().join("input.zip")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.path().join("images")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path().join("cache")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("output")
    }

    /// Remove the directory tree, reporting failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        let path = self.path().to_path_buf();
        let result = self.dir.close();
        match &result {
            Ok(()) => tracing::debug!(path = %path.display(), "Workspace removed"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove workspace"),
        }
        result
    }
}

/// Remove `model_*` directories under `root` last modified more than
/// `max_age` ago. Returns how many were removed.
///
/// Only call this before the pool starts; live workspaces of long jobs may
/// otherwise look stale.
pub fn sweep_stale(root: &Path, max_age: Duration) -> io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(PREFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                removed += 1;
                tracing::info!(path = %entry.path().display(), age_secs = age.as_secs(), "Removed stale workspace");
            }
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove stale workspace");
            }
        }
    }

    Ok(removed)
}
