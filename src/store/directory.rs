// src/store/directory.rs

//! Implementation store backed by a single cache directory
//!
//! Layout of a store root:
//!
//! ```text
//! <root>/
//!   .lock                         commit lock
//!   sha256new_4OYMIQUY.../        committed entries, named by digest id
//!   tmp-3f2a.../                  staging directories and pending removals
//! ```

use super::lock::CommitLock;
use super::{CommitOutcome, ImplementationStore, StagingDir, STAGING_PREFIX};
use crate::error::{Error, Result};
use crate::filesystem::{self, path::sanitize_filename};
use crate::manifest::{Manifest, ManifestDigest, ManifestFormat, ManifestGenerator, MANIFEST_FILE};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Key under which optimise treats two files as interchangeable
type FileKey = (String, i64, u64, bool);

/// A store rooted at one directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    write_protect: bool,
}

impl DirectoryStore {
    /// Open a store, creating its root directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::IoError(format!("Failed to create store at {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root,
            write_protect: true,
        })
    }

    /// Open a store whose root must already exist
    pub fn open_existing(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::NotFound(format!("Store directory {}", root.display())));
        }
        Ok(Self {
            root,
            write_protect: true,
        })
    }

    /// Whether committed entries are made read-only
    pub fn with_write_protection(mut self, write_protect: bool) -> Self {
        self.write_protect = write_protect;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a staging handle to a directory inside this store
    ///
    /// Only the id is trusted, and only after validation; the path a caller
    /// hands back is ignored.
    pub(crate) fn staging_path(&self, staging: &StagingDir) -> Result<PathBuf> {
        let id = &staging.id;
        let valid = id.len() > STAGING_PREFIX.len()
            && id.starts_with(STAGING_PREFIX)
            && sanitize_filename(id).is_ok_and(|clean| &clean == id);
        if !valid {
            return Err(Error::InvalidPath(format!("Not a staging directory id: {}", id)));
        }

        let path = self.root.join(id);
        match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => Ok(path),
            _ => Err(Error::NotFound(format!("Staging directory {}", id))),
        }
    }

    fn remove_staging(&self, path: &Path) {
        if let Err(e) = filesystem::remove_tree(path) {
            warn!("Failed to remove staging directory {}: {}", path.display(), e);
        }
    }

    fn commit_staged(&self, staged: &Path, expected: &ManifestDigest) -> Result<CommitOutcome> {
        let (format, hash) = expected.best_supported().ok_or_else(|| {
            Error::Misconfiguration(format!(
                "None of the digest algorithms of {} can be computed",
                expected
            ))
        })?;

        filesystem::apply_flags_natively(staged)?;

        let manifest = ManifestGenerator::new(staged, format).generate()?;
        let text = manifest.to_text();
        let actual_hash = format.digest_manifest(text.as_bytes())?;
        if actual_hash != hash {
            let expected_manifest = fs::read_to_string(staged.join(MANIFEST_FILE)).ok();
            return Err(Error::DigestMismatch {
                expected: format.id_for(hash),
                actual: format.id_for(&actual_hash),
                expected_manifest,
                actual_manifest: Some(text),
            });
        }
        manifest.save(&staged.join(MANIFEST_FILE))?;
        set_shared_mode(staged)?;

        let target = self.root.join(format.id_for(hash));
        {
            let _lock = CommitLock::acquire(&self.root)?;
            if let Ok(existing) = self.get_path(expected) {
                debug!("{} is already in {}", expected, self.root.display());
                return Ok(CommitOutcome::AlreadyPresent(existing));
            }
            if let Err(e) = fs::rename(staged, &target) {
                if target.is_dir() {
                    return Ok(CommitOutcome::AlreadyPresent(target));
                }
                return Err(Error::IoError(format!(
                    "Failed to move {} into place: {}",
                    staged.display(),
                    e
                )));
            }
        }

        if self.write_protect {
            if let Err(e) = filesystem::set_write_protection(&target, true) {
                warn!("Failed to write-protect {}: {}", target.display(), e);
            }
        }

        info!("Added {} to {}", format.id_for(hash), self.root.display());
        Ok(CommitOutcome::Committed(target))
    }

    /// Entry directories with the format their name declares
    fn entries(&self) -> Result<Vec<(ManifestFormat, String, PathBuf)>> {
        let mut entries = Vec::new();
        for name in self.dir_names()? {
            let Some((format, hash)) = ManifestFormat::split_id(&name) else {
                continue;
            };
            if format.is_valid_hash(hash) {
                let hash = hash.to_string();
                entries.push((format, hash, self.root.join(&name)));
            }
        }
        Ok(entries)
    }

    fn dir_names(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => debug!("Skipping non-UTF-8 entry {:?}", name),
            }
        }
        names.sort();
        Ok(names)
    }

    fn optimise_entry(
        &self,
        entry: &Path,
        manifest: &Manifest,
        seen: &mut HashMap<FileKey, PathBuf>,
    ) -> Result<u64> {
        let mut saved = 0;
        for (relative, node) in manifest.files() {
            let crate::manifest::ManifestNode::File {
                hash,
                mtime,
                size,
                executable,
                ..
            } = node
            else {
                continue;
            };
            let path = entry.join(&relative);
            if !path.is_file() {
                continue;
            }

            let key = (hash.clone(), *mtime, *size, *executable);
            match seen.get(&key) {
                Some(original) => {
                    if filesystem::same_file(original, &path)? {
                        continue;
                    }
                    filesystem::replace_with_hardlink(original, &path)?;
                    debug!("Linked {} to {}", path.display(), original.display());
                    saved += *size;
                }
                None => {
                    seen.insert(key, path);
                }
            }
        }
        Ok(saved)
    }
}

#[cfg(unix)]
fn set_shared_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_shared_mode(_path: &Path) -> Result<()> {
    Ok(())
}

impl ImplementationStore for DirectoryStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.get_path(digest).is_ok()
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        for (format, hash) in digest.formats() {
            if !format.is_valid_hash(hash) {
                continue;
            }
            let path = self.root.join(format.id_for(hash));
            if path.is_dir() {
                return Ok(path);
            }
        }
        Err(Error::NotFound(digest.to_string()))
    }

    fn stage_new(&self) -> Result<StagingDir> {
        fs::create_dir_all(&self.root)?;
        let id = format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4().simple());
        let path = self.root.join(&id);
        fs::create_dir(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o700))?;
        }

        debug!("Created staging directory {}", path.display());
        Ok(StagingDir { id, path })
    }

    fn verify_and_commit(
        &self,
        staging: &StagingDir,
        expected: &ManifestDigest,
    ) -> Result<CommitOutcome> {
        let staged = self.staging_path(staging)?;
        let result = self.commit_staged(&staged, expected);
        match &result {
            Ok(CommitOutcome::Committed(_)) => {}
            Ok(CommitOutcome::AlreadyPresent(_)) | Err(_) => self.remove_staging(&staged),
        }
        result
    }

    fn discard_staging(&self, staging: &StagingDir) -> Result<()> {
        let staged = self.staging_path(staging)?;
        filesystem::remove_tree(&staged)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let path = self.get_path(digest)?;

        // Rename first so the entry disappears atomically even if deletion
        // is interrupted
        let doomed = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4().simple()));
        fs::rename(&path, &doomed)?;
        filesystem::remove_tree(&doomed)?;

        info!("Removed {} from {}", digest, self.root.display());
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        Ok(self
            .dir_names()?
            .iter()
            .filter_map(|name| ManifestDigest::from_dir_name(name))
            .collect())
    }

    fn list_all_temp(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .dir_names()?
            .into_iter()
            .filter(|name| ManifestDigest::from_dir_name(name).is_none())
            .map(|name| self.root.join(name))
            .collect())
    }

    fn optimise(&self) -> Result<u64> {
        let mut seen: HashMap<FileKey, PathBuf> = HashMap::new();
        let mut saved = 0;

        for (format, _, entry) in self.entries()? {
            let manifest_path = entry.join(MANIFEST_FILE);
            let manifest = match Manifest::load(&manifest_path, format) {
                Ok(manifest) => manifest,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.display(), e);
                    continue;
                }
            };

            if self.write_protect {
                filesystem::set_write_protection(&entry, false)?;
            }
            let result = self.optimise_entry(&entry, &manifest, &mut seen);
            if self.write_protect {
                filesystem::set_write_protection(&entry, true)?;
            }
            saved += result?;
        }

        info!("Optimised {}: {} bytes reclaimed", self.root.display(), saved);
        Ok(saved)
    }

    fn verify(&self, digest: &ManifestDigest) -> Result<()> {
        let path = self.get_path(digest)?;
        // Check against the algorithm the entry is named by
        let named = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(ManifestDigest::from_dir_name)
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

        verify_directory(&path, &named)?;
        debug!("Verified {}", named);
        Ok(())
    }
}

/// Recompute the manifest of `path` and compare it with `expected`
pub fn verify_directory(path: &Path, expected: &ManifestDigest) -> Result<()> {
    let (format, hash) = expected.best_supported().ok_or_else(|| {
        Error::Misconfiguration(format!(
            "None of the digest algorithms of {} can be computed",
            expected
        ))
    })?;

    let manifest = ManifestGenerator::new(path, format).generate()?;
    let text = manifest.to_text();
    let actual_hash = format.digest_manifest(text.as_bytes())?;
    if actual_hash != hash {
        return Err(Error::DigestMismatch {
            expected: format.id_for(hash),
            actual: format.id_for(&actual_hash),
            expected_manifest: fs::read_to_string(path.join(MANIFEST_FILE)).ok(),
            actual_manifest: Some(text),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::generate;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("README"), "hello\n").unwrap();
        fs::write(dir.join("bin/tool"), "#!/bin/sh\n").unwrap();
        filetime::set_file_mtime(dir.join("README"), filetime::FileTime::from_unix_time(1_000_000, 0))
            .unwrap();
        filetime::set_file_mtime(dir.join("bin/tool"), filetime::FileTime::from_unix_time(1_000_000, 0))
            .unwrap();
    }

    fn digest_of(dir: &Path) -> ManifestDigest {
        let id = generate(dir, ManifestFormat::Sha256New)
            .unwrap()
            .calculate_digest()
            .unwrap();
        ManifestDigest::from_id(&id).unwrap()
    }

    fn setup() -> (TempDir, DirectoryStore, PathBuf, ManifestDigest) {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path().join("store")).unwrap();
        let source = temp_dir.path().join("source");
        populate(&source);
        let digest = digest_of(&source);
        (temp_dir, store, source, digest)
    }

    #[test]
    fn test_add_directory_and_lookup() {
        let (_temp, store, source, digest) = setup();

        let outcome = store.add_directory(&source, &digest).unwrap();
        assert!(!outcome.is_already_present());
        assert!(store.contains(&digest));
        assert_eq!(store.get_path(&digest).unwrap(), outcome.path());
        assert!(outcome.path().join(MANIFEST_FILE).is_file());
        assert!(store.list_all_temp().unwrap().is_empty());
        assert_eq!(store.list_all().unwrap(), vec![digest.clone()]);
    }

    #[test]
    fn test_add_twice_reports_already_present() {
        let (_temp, store, source, digest) = setup();
        store.add_directory(&source, &digest).unwrap();

        let outcome = store.add_directory(&source, &digest).unwrap();
        assert!(outcome.is_already_present());
    }

    #[test]
    fn test_commit_mismatch_leaves_no_trace() {
        let (_temp, store, source, _) = setup();
        let wrong = ManifestDigest::from_id(
            "sha256new_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
        )
        .unwrap();

        let err = store.add_directory(&source, &wrong).unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
        assert!(!store.contains(&wrong));
        assert!(store.list_all().unwrap().is_empty());
        assert!(store.list_all_temp().unwrap().is_empty());
    }

    #[test]
    fn test_sha1_only_digest_is_misconfiguration() {
        let (_temp, store, source, _) = setup();
        let digest = ManifestDigest::from_id("sha1new=0123456789abcdef").unwrap();

        let err = store.add_directory(&source, &digest).unwrap_err();
        assert!(matches!(err, Error::Misconfiguration(_)));
        assert!(store.list_all_temp().unwrap().is_empty());
    }

    #[test]
    fn test_staging_id_is_validated() {
        let (_temp, store, _, digest) = setup();
        let forged = StagingDir {
            id: "../escape".to_string(),
            path: PathBuf::from("/tmp"),
        };
        assert!(store.verify_and_commit(&forged, &digest).is_err());

        let not_staging = StagingDir {
            id: "sha256new_ABC".to_string(),
            path: PathBuf::from("/tmp"),
        };
        assert!(store.discard_staging(&not_staging).is_err());
    }

    #[test]
    fn test_stage_and_discard() {
        let (_temp, store, _, _) = setup();
        let staging = store.stage_new().unwrap();
        assert!(staging.path.is_dir());
        assert_eq!(store.list_all_temp().unwrap(), vec![staging.path.clone()]);

        store.discard_staging(&staging).unwrap();
        assert!(!staging.path.exists());
    }

    #[test]
    fn test_remove() {
        let (_temp, store, source, digest) = setup();
        store.add_directory(&source, &digest).unwrap();

        store.remove(&digest).unwrap();
        assert!(!store.contains(&digest));
        assert!(store.list_all_temp().unwrap().is_empty());
        assert!(matches!(store.remove(&digest), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let (_temp, store, source, digest) = setup();
        let path = store.add_directory(&source, &digest).unwrap().path().to_path_buf();
        store.verify(&digest).unwrap();

        filesystem::set_write_protection(&path, false).unwrap();
        fs::write(path.join("README"), "tampered\n").unwrap();

        let err = store.verify(&digest).unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
        assert!(store.contains(&digest));
    }

    #[cfg(unix)]
    #[test]
    fn test_committed_entry_is_write_protected() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, store, source, digest) = setup();
        let path = store.add_directory(&source, &digest).unwrap().path().to_path_buf();

        let mode = fs::metadata(path.join("README")).unwrap().permissions().mode();
        assert_eq!(mode & 0o222, 0);
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o222, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_optimise_links_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path().join("store")).unwrap();

        let first = temp_dir.path().join("first");
        populate(&first);
        let second = temp_dir.path().join("second");
        populate(&second);
        fs::write(second.join("extra"), "more").unwrap();

        let first_digest = digest_of(&first);
        let second_digest = digest_of(&second);
        store.add_directory(&first, &first_digest).unwrap();
        store.add_directory(&second, &second_digest).unwrap();

        let saved = store.optimise().unwrap();
        assert_eq!(saved, ("hello\n".len() + "#!/bin/sh\n".len()) as u64);

        let a = store.get_path(&first_digest).unwrap().join("README");
        let b = store.get_path(&second_digest).unwrap().join("README");
        assert!(filesystem::same_file(&a, &b).unwrap());

        // Second run finds nothing left to do
        assert_eq!(store.optimise().unwrap(), 0);
        store.verify(&first_digest).unwrap();
        store.verify(&second_digest).unwrap();
    }
}
