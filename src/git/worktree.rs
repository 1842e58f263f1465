//! Per-job working trees.
//!
//! Each job gets a fresh directory under the configured work root, named
//! `job-<id>-<random>`. The directory is owned by a [`WorkingTree`] value and
//! removed when that value is released or dropped, so every exit path of a
//! job (success, error, cancellation, panic unwinding) cleans up.
//!
//! If the process dies mid-job, directories are left behind. [`cleanup_stale`]
//! removes them on startup.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::types::JobId;

use super::GitResult;

/// Prefix of every working tree directory created by this process.
pub const WORKING_TREE_PREFIX: &str = "job-";

/// An exclusively owned temporary directory for one job.
#[derive(Debug)]
pub struct WorkingTree {
    dir: TempDir,
}

impl WorkingTree {
    /// Creates a new working tree for `job` under `root`.
    pub fn create(root: &Path, job: &JobId) -> GitResult<WorkingTree> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", WORKING_TREE_PREFIX, job))
            .tempdir_in(root)?;
        debug!(path = %dir.path().display(), job = %job, "Created working tree");
        Ok(WorkingTree { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a subdirectory for one component's clone.
    pub fn component_dir(&self, slug: &str) -> PathBuf {
        self.dir.path().join(slug)
    }

    /// Removes the directory off the async runtime's worker threads.
    pub async fn release(self) {
        let path = self.dir.path().to_path_buf();
        let result = tokio::task::spawn_blocking(move || self.dir.close()).await;
        match result {
            Ok(Ok(())) => debug!(path = %path.display(), "Released working tree"),
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to remove working tree"),
            Err(e) => warn!(path = %path.display(), error = %e, "Working tree cleanup task failed"),
        }
    }
}

/// Removes working trees under `root` older than `max_age`.
///
/// Returns the removed paths.
pub fn cleanup_stale(root: &Path, max_age: Duration) -> GitResult<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(vec![]);
    }

    let mut removed = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let is_tree = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(WORKING_TREE_PREFIX));
        if !is_tree || !path.is_dir() {
            continue;
        }

        let modified = std::fs::metadata(&path)?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        // >= so that a zero max age removes everything.
        if age >= max_age {
            info!(
                path = %path.display(),
                age_secs = age.as_secs(),
                "Removing stale working tree"
            );
            std::fs::remove_dir_all(&path)?;
            removed.push(path);
        }
    }

    removed.sort();
    Ok(removed)
}
