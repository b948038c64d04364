// src/store/lock.rs

//! Commit lock for a store root
//!
//! Only the final rename of a verified tree needs serialising. The lock is
//! an advisory `flock(LOCK_EX)` on `<root>/.lock`, so it covers threads of
//! one process as well as separate processes sharing a cache.

use crate::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Name of the lock file inside a store root
pub const LOCK_FILE: &str = ".lock";

/// Exclusive commit lock, released on drop
pub struct CommitLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl CommitLock {
    /// Acquire the lock for `root`, blocking until available
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        file.lock_exclusive().map_err(|e| {
            crate::Error::IoError(format!("Failed to lock {}: {}", path.display(), e))
        })?;

        trace!("Acquired commit lock {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for CommitLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();

        let lock = CommitLock::acquire(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join(LOCK_FILE).exists());

        let other = File::open(temp_dir.path().join(LOCK_FILE)).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(lock);
        assert!(other.try_lock_exclusive().is_ok());
    }
}
