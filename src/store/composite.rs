// src/store/composite.rs

//! Several stores presented as one
//!
//! Lookups try members in order and the first hit wins. New content goes
//! to the first member only, so a user cache or the store service should be
//! listed before read-only system caches.

use super::{CommitOutcome, ImplementationStore, StagingDir};
use crate::archive::LocalArchive;
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::manifest::ManifestDigest;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Ordered list of member stores
pub struct CompositeStore {
    stores: Vec<Box<dyn ImplementationStore>>,
}

impl CompositeStore {
    pub fn new(stores: Vec<Box<dyn ImplementationStore>>) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &[Box<dyn ImplementationStore>] {
        &self.stores
    }

    fn primary(&self) -> Result<&dyn ImplementationStore> {
        self.stores
            .first()
            .map(|store| store.as_ref())
            .ok_or_else(|| Error::Config("No implementation stores configured".to_string()))
    }

    fn containing<'a>(
        &'a self,
        digest: &'a ManifestDigest,
    ) -> impl Iterator<Item = &'a dyn ImplementationStore> + 'a {
        self.stores
            .iter()
            .map(|store| store.as_ref())
            .filter(move |store| store.contains(digest))
    }
}

impl ImplementationStore for CompositeStore {
    fn describe(&self) -> String {
        self.stores
            .iter()
            .map(|store| store.describe())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.stores.iter().any(|store| store.contains(digest))
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        for store in &self.stores {
            match store.get_path(digest) {
                Ok(path) => return Ok(path),
                Err(Error::NotFound(_)) => {}
                Err(e) => debug!("Lookup in {} failed: {}", store.describe(), e),
            }
        }
        Err(Error::NotFound(digest.to_string()))
    }

    fn stage_new(&self) -> Result<StagingDir> {
        self.primary()?.stage_new()
    }

    fn verify_and_commit(
        &self,
        staging: &StagingDir,
        expected: &ManifestDigest,
    ) -> Result<CommitOutcome> {
        self.primary()?.verify_and_commit(staging, expected)
    }

    fn discard_staging(&self, staging: &StagingDir) -> Result<()> {
        self.primary()?.discard_staging(staging)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let mut removed = false;
        for store in self.containing(digest) {
            store.remove(digest)?;
            removed = true;
        }
        if removed {
            Ok(())
        } else {
            Err(Error::NotFound(digest.to_string()))
        }
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        let mut all: Vec<ManifestDigest> = Vec::new();
        for store in &self.stores {
            match store.list_all() {
                Ok(digests) => {
                    for digest in digests {
                        if !all.contains(&digest) {
                            all.push(digest);
                        }
                    }
                }
                Err(e) => warn!("Failed to list {}: {}", store.describe(), e),
            }
        }
        Ok(all)
    }

    fn list_all_temp(&self) -> Result<Vec<PathBuf>> {
        let mut all = Vec::new();
        for store in &self.stores {
            all.extend(store.list_all_temp()?);
        }
        Ok(all)
    }

    fn optimise(&self) -> Result<u64> {
        let mut saved = 0;
        for store in &self.stores {
            saved += store.optimise()?;
        }
        Ok(saved)
    }

    fn verify(&self, digest: &ManifestDigest) -> Result<()> {
        let mut found = false;
        for store in self.containing(digest) {
            store.verify(digest)?;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(Error::NotFound(digest.to_string()))
        }
    }

    fn add_directory(&self, source: &Path, digest: &ManifestDigest) -> Result<CommitOutcome> {
        if let Ok(path) = self.get_path(digest) {
            return Ok(CommitOutcome::AlreadyPresent(path));
        }
        self.primary()?.add_directory(source, digest)
    }

    fn add_archives(
        &self,
        archives: &[LocalArchive],
        digest: &ManifestDigest,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome> {
        if let Ok(path) = self.get_path(digest) {
            return Ok(CommitOutcome::AlreadyPresent(path));
        }
        self.primary()?.add_archives(archives, digest, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{generate, ManifestFormat};
    use crate::store::DirectoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn source_with(temp_dir: &TempDir, name: &str, content: &str) -> (PathBuf, ManifestDigest) {
        let dir = temp_dir.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("data"), content).unwrap();
        let id = generate(&dir, ManifestFormat::Sha256New)
            .unwrap()
            .calculate_digest()
            .unwrap();
        (dir, ManifestDigest::from_id(&id).unwrap())
    }

    fn two_stores(temp_dir: &TempDir) -> (DirectoryStore, DirectoryStore, CompositeStore) {
        let first = DirectoryStore::new(temp_dir.path().join("first")).unwrap();
        let second = DirectoryStore::new(temp_dir.path().join("second")).unwrap();
        let composite = CompositeStore::new(vec![
            Box::new(first.clone()) as Box<dyn ImplementationStore>,
            Box::new(second.clone()),
        ]);
        (first, second, composite)
    }

    #[test]
    fn test_reads_fall_through_members() {
        let temp_dir = TempDir::new().unwrap();
        let (_first, second, composite) = two_stores(&temp_dir);
        let (source, digest) = source_with(&temp_dir, "a", "alpha");

        second.add_directory(&source, &digest).unwrap();
        assert!(composite.contains(&digest));
        assert_eq!(composite.get_path(&digest).unwrap(), second.get_path(&digest).unwrap());
    }

    #[test]
    fn test_writes_go_to_first_member() {
        let temp_dir = TempDir::new().unwrap();
        let (first, second, composite) = two_stores(&temp_dir);
        let (source, digest) = source_with(&temp_dir, "a", "alpha");

        composite.add_directory(&source, &digest).unwrap();
        assert!(first.contains(&digest));
        assert!(!second.contains(&digest));
    }

    #[test]
    fn test_add_skips_when_any_member_has_it() {
        let temp_dir = TempDir::new().unwrap();
        let (first, second, composite) = two_stores(&temp_dir);
        let (source, digest) = source_with(&temp_dir, "a", "alpha");

        second.add_directory(&source, &digest).unwrap();
        assert!(composite.add_directory(&source, &digest).unwrap().is_already_present());
        assert!(!first.contains(&digest));
    }

    #[test]
    fn test_list_all_is_deduplicated_union() {
        let temp_dir = TempDir::new().unwrap();
        let (first, second, composite) = two_stores(&temp_dir);
        let (a, a_digest) = source_with(&temp_dir, "a", "alpha");
        let (b, b_digest) = source_with(&temp_dir, "b", "beta");

        first.add_directory(&a, &a_digest).unwrap();
        second.add_directory(&a, &a_digest).unwrap();
        second.add_directory(&b, &b_digest).unwrap();

        let all = composite.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&a_digest));
        assert!(all.contains(&b_digest));
    }

    #[test]
    fn test_remove_from_every_member() {
        let temp_dir = TempDir::new().unwrap();
        let (first, second, composite) = two_stores(&temp_dir);
        let (a, digest) = source_with(&temp_dir, "a", "alpha");

        first.add_directory(&a, &digest).unwrap();
        second.add_directory(&a, &digest).unwrap();

        composite.remove(&digest).unwrap();
        assert!(!first.contains(&digest));
        assert!(!second.contains(&digest));
        assert!(matches!(composite.remove(&digest), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_empty_composite() {
        let composite = CompositeStore::new(Vec::new());
        assert!(composite.list_all().unwrap().is_empty());
        assert!(matches!(composite.stage_new(), Err(Error::Config(_))));
    }
}
