// src/store/mod.rs

//! Implementation stores
//!
//! A store owns cache directories named after manifest digests. New content
//! only ever enters through the same path: allocate a staging directory,
//! populate it, then verify its manifest against the expected digest and
//! atomically rename it into place.
//!
//! - [`DirectoryStore`]: one cache directory on the local filesystem
//! - [`CompositeStore`]: several stores behind one interface
//! - [`SecureStore`]: privilege-separated wrapper used by the store service
//! - [`crate::service::ServiceClient`]: a store reached over the service socket

mod composite;
mod config;
mod directory;
mod lock;
mod secure;

pub use composite::CompositeStore;
pub use config::{default_implementation_dirs, open_store, parse_legacy_dirs, StoreConfig};
pub use directory::{verify_directory, DirectoryStore};
pub use lock::{CommitLock, LOCK_FILE};
pub use secure::{SecureSession, SecureStore, SecurityContext, ServiceIdentity};

use crate::archive::LocalArchive;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::filesystem;
use crate::manifest::ManifestDigest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Prefix of staging directory names
pub const STAGING_PREFIX: &str = "tmp-";

/// A staging directory handed out by [`ImplementationStore::stage_new`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingDir {
    /// Store-local identifier (the directory name)
    pub id: String,
    /// Where the caller should write the candidate tree
    pub path: PathBuf,
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "path", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// The staged tree became a new cache entry
    Committed(PathBuf),
    /// An entry for the digest already existed; the staged tree was discarded
    AlreadyPresent(PathBuf),
}

impl CommitOutcome {
    /// Path of the cache entry
    pub fn path(&self) -> &Path {
        match self {
            Self::Committed(path) | Self::AlreadyPresent(path) => path,
        }
    }

    pub fn is_already_present(&self) -> bool {
        matches!(self, Self::AlreadyPresent(_))
    }
}

/// Content-addressed implementation store
pub trait ImplementationStore: Send + Sync {
    /// Human-readable location, for logs and listings
    fn describe(&self) -> String;

    /// Whether an entry exists under any of the digest's algorithms
    fn contains(&self, digest: &ManifestDigest) -> bool;

    /// Path of the entry, or [`crate::Error::NotFound`]
    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf>;

    /// Allocate a fresh, private staging directory
    fn stage_new(&self) -> Result<StagingDir>;

    /// Verify a staged tree against `expected` and commit it
    ///
    /// The staging directory is gone afterwards whatever the outcome.
    fn verify_and_commit(
        &self,
        staging: &StagingDir,
        expected: &ManifestDigest,
    ) -> Result<CommitOutcome>;

    /// Delete a staging directory without committing it
    fn discard_staging(&self, staging: &StagingDir) -> Result<()>;

    /// Delete an entry
    fn remove(&self, digest: &ManifestDigest) -> Result<()>;

    /// Digests of all entries
    fn list_all(&self) -> Result<Vec<ManifestDigest>>;

    /// Directories that are not entries (staging leftovers, interrupted
    /// removals)
    fn list_all_temp(&self) -> Result<Vec<PathBuf>>;

    /// Hard-link identical files across entries, returning bytes reclaimed
    fn optimise(&self) -> Result<u64>;

    /// Re-check an existing entry against its digest; the entry is left in
    /// place on mismatch
    fn verify(&self, digest: &ManifestDigest) -> Result<()>;

    /// Copy a directory into the store, verifying it against `digest`
    fn add_directory(&self, source: &Path, digest: &ManifestDigest) -> Result<CommitOutcome> {
        if self.contains(digest) {
            return Ok(CommitOutcome::AlreadyPresent(self.get_path(digest)?));
        }

        let staging = self.stage_new()?;
        if let Err(e) = filesystem::copy_dir(source, &staging.path) {
            self.discard_quietly(&staging);
            return Err(e);
        }
        self.verify_and_commit(&staging, digest)
    }

    /// Extract archives on top of each other and commit the combined tree
    fn add_archives(
        &self,
        archives: &[LocalArchive],
        digest: &ManifestDigest,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome> {
        if self.contains(digest) {
            return Ok(CommitOutcome::AlreadyPresent(self.get_path(digest)?));
        }

        let staging = self.stage_new()?;
        for archive in archives {
            if let Err(e) = archive.extract_into(&staging.path, cancel) {
                self.discard_quietly(&staging);
                return Err(e);
            }
        }
        self.verify_and_commit(&staging, digest)
    }

    #[doc(hidden)]
    fn discard_quietly(&self, staging: &StagingDir) {
        if let Err(e) = self.discard_staging(staging) {
            warn!("Failed to discard staging directory {}: {}", staging.path.display(), e);
        }
    }
}

impl<T: ImplementationStore + ?Sized> ImplementationStore for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn contains(&self, digest: &ManifestDigest) -> bool {
        (**self).contains(digest)
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        (**self).get_path(digest)
    }

    fn stage_new(&self) -> Result<StagingDir> {
        (**self).stage_new()
    }

    fn verify_and_commit(
        &self,
        staging: &StagingDir,
        expected: &ManifestDigest,
    ) -> Result<CommitOutcome> {
        (**self).verify_and_commit(staging, expected)
    }

    fn discard_staging(&self, staging: &StagingDir) -> Result<()> {
        (**self).discard_staging(staging)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        (**self).remove(digest)
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        (**self).list_all()
    }

    fn list_all_temp(&self) -> Result<Vec<PathBuf>> {
        (**self).list_all_temp()
    }

    fn optimise(&self) -> Result<u64> {
        (**self).optimise()
    }

    fn verify(&self, digest: &ManifestDigest) -> Result<()> {
        (**self).verify(digest)
    }
}
