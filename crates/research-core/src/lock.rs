//! Per-project write lock.
//!
//! Every write path holds an exclusive advisory lock on `.research/.lock`
//! while it reads, modifies and persists. `flock` semantics apply to each
//! open file description, so two handles in the same process exclude each
//! other as well. Locked operations must not acquire the lock again.

use crate::error::Result;
use crate::paths;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Held for the duration of a write. Released on drop.
#[derive(Debug)]
pub struct ProjectLock {
    file: File,
}

impl ProjectLock {
    /// Block until the lock for `root` is acquired.
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = paths::lock_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        tracing::debug!(path = %path.display(), "acquired project lock");
        Ok(Self { file })
    }

    /// Acquire without blocking. `Ok(None)` if another holder has it.
    pub fn try_acquire(root: &Path) -> Result<Option<Self>> {
        let path = paths::lock_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "failed to release project lock");
        }
    }
}
