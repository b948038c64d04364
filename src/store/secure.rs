// src/store/secure.rs

//! Privilege-separated store
//!
//! The store service runs as a dedicated identity and owns a shared cache
//! that ordinary users cannot write to. Users still contribute content: they
//! are handed a staging directory they own, fill it, and ask the service to
//! verify and commit it. The service never hashes or commits the caller's
//! files in place. It reads them into a fresh staging directory of its own,
//! deletes the caller's tree, and verifies the copy, so descriptors or links
//! the caller kept have no hold on what ends up in the cache.
//!
//! Each request runs in a [`SecureSession`] that carries the caller's
//! credentials; a staging directory can only be committed or discarded by
//! the user it was handed to. Every operation and refusal is written to the
//! audit log.

use super::directory::DirectoryStore;
use super::{CommitOutcome, ImplementationStore, StagingDir};
use crate::error::{Error, Result};
use crate::filesystem;
use crate::manifest::ManifestDigest;
use crate::service::auth::{Action, AuditLogger, PeerCredentials};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// User and group the service owns committed content as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl ServiceIdentity {
    /// Identity of the running process
    pub fn current() -> Self {
        let creds = PeerCredentials::current();
        Self {
            uid: creds.uid,
            gid: creds.gid,
        }
    }
}

/// Who is asking, as established by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityContext {
    pub caller: PeerCredentials,
    pub is_admin: bool,
}

impl SecurityContext {
    pub fn new(caller: PeerCredentials, is_admin: bool) -> Self {
        Self { caller, is_admin }
    }
}

/// Shared cache guarded by the service identity
pub struct SecureStore {
    inner: DirectoryStore,
    identity: ServiceIdentity,
    commit_lock: Mutex<()>,
    /// Staging id -> uid it was handed to
    staging_owners: Mutex<HashMap<String, u32>>,
    audit: Mutex<AuditLogger>,
}

impl SecureStore {
    pub fn new(inner: DirectoryStore, identity: ServiceIdentity) -> Self {
        Self {
            inner,
            identity,
            commit_lock: Mutex::new(()),
            staging_owners: Mutex::new(HashMap::new()),
            audit: Mutex::new(AuditLogger::new()),
        }
    }

    /// Keep at most `max` audit entries in memory
    pub fn with_audit_history(self, max: usize) -> Self {
        Self {
            audit: Mutex::new(AuditLogger::new().with_max_entries(max)),
            ..self
        }
    }

    pub fn inner(&self) -> &DirectoryStore {
        &self.inner
    }

    pub fn identity(&self) -> ServiceIdentity {
        self.identity
    }

    /// Bind a caller to the store for one or more requests
    pub fn session<'a>(&'a self, ctx: &SecurityContext) -> SecureSession<'a> {
        SecureSession { store: self, ctx: *ctx }
    }

    /// Number of audit entries recorded so far (bounded by the history size)
    pub fn audit_len(&self) -> usize {
        self.audit.lock().map(|log| log.all_entries().len()).unwrap_or(0)
    }

    /// Snapshot of the most recent audit lines
    pub fn recent_audit(&self, count: usize) -> Vec<String> {
        match self.audit.lock() {
            Ok(log) => log
                .recent_entries(count)
                .iter()
                .map(|entry| entry.to_log_message())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn audit(&self, ctx: &SecurityContext, action: Action, allowed: bool, details: &str) {
        match self.audit.lock() {
            Ok(mut log) => log.log_action(ctx.caller, action, allowed, Some(details)),
            Err(poisoned) => {
                poisoned
                    .into_inner()
                    .log_action(ctx.caller, action, allowed, Some(details))
            }
        }
    }

    fn owners(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, u32>>> {
        self.staging_owners
            .lock()
            .map_err(|_| Error::Service("Staging table poisoned".to_string()))
    }

    fn record_owner(&self, staging: &StagingDir, uid: u32) -> Result<()> {
        self.owners()?.insert(staging.id.clone(), uid);
        Ok(())
    }

    fn owner_of(&self, staging: &StagingDir) -> Result<Option<u32>> {
        Ok(self.owners()?.get(&staging.id).copied())
    }

    fn forget(&self, staging: &StagingDir) {
        if let Ok(mut owners) = self.staging_owners.lock() {
            owners.remove(&staging.id);
        }
    }

    /// Delete a caller-written tree without touching any file's mode
    fn remove_caller_tree(&self, path: &Path) {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("Failed to remove caller staging directory {}: {}", path.display(), e);
        }
    }

    /// Copy a caller-written tree into a directory owned by the service
    ///
    /// Only regular files owned by `owner` with a single link are read; the
    /// copies get fresh modes (0755 or 0644) and keep their mtimes.
    #[cfg(unix)]
    fn import(&self, src: &Path, dst: &Path, owner: u32) -> Result<()> {
        use filetime::FileTime;
        use std::io;
        use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
        use walkdir::WalkDir;

        for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
            let entry = entry
                .map_err(|e| Error::IoError(format!("Failed to walk {}: {}", src.display(), e)))?;
            let relative = entry
                .path()
                .strip_prefix(src)
                .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
            let target = dst.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir(&target)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
            } else if file_type.is_symlink() {
                std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
            } else if file_type.is_file() {
                let (mut file, metadata) = filesystem::open_regular(entry.path())?;
                if metadata.uid() != owner {
                    return Err(Error::PermissionDenied(format!(
                        "{} is not owned by uid {}",
                        entry.path().display(),
                        owner
                    )));
                }
                if metadata.nlink() > 1 {
                    return Err(Error::PermissionDenied(format!(
                        "{} is hard-linked outside the staging directory",
                        entry.path().display()
                    )));
                }

                let mode = if metadata.mode() & 0o111 != 0 { 0o755 } else { 0o644 };
                let mut out = fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(mode)
                    .open(&target)?;
                io::copy(&mut file, &mut out)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
                filetime::set_file_mtime(&target, FileTime::from_last_modification_time(&metadata))?;
            } else {
                return Err(filesystem::not_regular(entry.path()));
            }
        }
        debug!("Imported {} into {}", src.display(), dst.display());
        Ok(())
    }

    #[cfg(not(unix))]
    fn import(&self, src: &Path, dst: &Path, _owner: u32) -> Result<()> {
        filesystem::copy_dir(src, dst)
    }
}

/// A [`SecureStore`] acting on behalf of one caller
pub struct SecureSession<'a> {
    store: &'a SecureStore,
    ctx: SecurityContext,
}

impl SecureSession<'_> {
    pub fn context(&self) -> &SecurityContext {
        &self.ctx
    }

    fn audited<T>(&self, action: Action, details: &str, result: Result<T>) -> Result<T> {
        let detail = match &result {
            Ok(_) => details.to_string(),
            Err(e) => format!("{}: {}", details, e),
        };
        self.store.audit(&self.ctx, action, result.is_ok(), &detail);
        result
    }

    fn require_admin(&self, action: Action, details: &str) -> Result<()> {
        if self.ctx.is_admin {
            return Ok(());
        }
        self.store.audit(&self.ctx, action, false, details);
        Err(Error::PermissionDenied(format!(
            "{:?} requires administrative rights",
            action
        )))
    }

    /// Fail unless the caller is the one the staging directory was handed to
    fn require_owner(&self, staging: &StagingDir, admin_override: bool) -> Result<()> {
        if admin_override && self.ctx.is_admin {
            return Ok(());
        }
        match self.store.owner_of(staging)? {
            Some(uid) if uid == self.ctx.caller.uid => Ok(()),
            _ => Err(Error::PermissionDenied(format!(
                "Staging directory {} does not belong to uid {}",
                staging.id, self.ctx.caller.uid
            ))),
        }
    }

    fn hand_over(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            if self.ctx.caller.uid != self.store.identity.uid {
                std::os::unix::fs::chown(path, Some(self.ctx.caller.uid), None).map_err(|e| {
                    Error::PermissionDenied(format!(
                        "Cannot hand {} to uid {}: {}",
                        path.display(),
                        self.ctx.caller.uid,
                        e
                    ))
                })?;
            }
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }

    fn commit_caller_tree(
        &self,
        staging: &StagingDir,
        expected: &ManifestDigest,
    ) -> Result<CommitOutcome> {
        self.require_owner(staging, false)?;
        let _guard = self
            .store
            .commit_lock
            .lock()
            .map_err(|_| Error::Service("Commit lock poisoned".to_string()))?;

        let caller_tree = self.store.inner.staging_path(staging)?;
        let own = self.store.inner.stage_new();
        let imported = own.and_then(|own| {
            match self.store.import(&caller_tree, &own.path, self.ctx.caller.uid) {
                Ok(()) => Ok(own),
                Err(e) => {
                    let _ = self.store.inner.discard_staging(&own);
                    Err(e)
                }
            }
        });

        self.store.remove_caller_tree(&caller_tree);
        self.store.forget(staging);
        self.store.inner.verify_and_commit(&imported?, expected)
    }
}

impl ImplementationStore for SecureSession<'_> {
    fn describe(&self) -> String {
        self.store.inner.describe()
    }

    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.store.inner.contains(digest)
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        self.store.inner.get_path(digest)
    }

    fn stage_new(&self) -> Result<StagingDir> {
        let result = self.store.inner.stage_new().and_then(|staging| {
            let handed = self
                .hand_over(&staging.path)
                .and_then(|()| self.store.record_owner(&staging, self.ctx.caller.uid));
            if let Err(e) = handed {
                let _ = self.store.inner.discard_staging(&staging);
                return Err(e);
            }
            Ok(staging)
        });
        let details = match &result {
            Ok(staging) => staging.id.clone(),
            Err(_) => "staging".to_string(),
        };
        self.audited(Action::Stage, &details, result)
    }

    fn verify_and_commit(
        &self,
        staging: &StagingDir,
        expected: &ManifestDigest,
    ) -> Result<CommitOutcome> {
        let details = format!("{} from {}", expected, staging.id);
        let result = self.commit_caller_tree(staging, expected);
        self.audited(Action::Commit, &details, result)
    }

    fn discard_staging(&self, staging: &StagingDir) -> Result<()> {
        let result = self.require_owner(staging, true).and_then(|()| {
            let path = self.store.inner.staging_path(staging)?;
            fs::remove_dir_all(&path)?;
            self.store.forget(staging);
            Ok(())
        });
        self.audited(Action::Stage, &format!("discard {}", staging.id), result)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let details = format!("remove {}", digest);
        self.require_admin(Action::Remove, &details)?;
        let result = self.store.inner.remove(digest);
        self.audited(Action::Remove, &details, result)
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        let result = self.store.inner.list_all();
        self.audited(Action::Query, "list", result)
    }

    /// Staging paths reveal other users' work in progress
    fn list_all_temp(&self) -> Result<Vec<PathBuf>> {
        self.require_admin(Action::Query, "list temporary")?;
        let result = self.store.inner.list_all_temp();
        self.audited(Action::Query, "list temporary", result)
    }

    fn optimise(&self) -> Result<u64> {
        self.require_admin(Action::Optimise, "optimise")?;
        let result = self.store.inner.optimise();
        self.audited(Action::Optimise, "optimise", result)
    }

    fn verify(&self, digest: &ManifestDigest) -> Result<()> {
        let result = self.store.inner.verify(digest);
        self.audited(Action::Verify, &digest.to_string(), result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{generate, ManifestFormat};
    use tempfile::TempDir;

    fn secure_store(temp_dir: &TempDir) -> SecureStore {
        let inner = DirectoryStore::new(temp_dir.path().join("shared")).unwrap();
        SecureStore::new(inner, ServiceIdentity::current())
    }

    fn me(is_admin: bool) -> SecurityContext {
        SecurityContext::new(PeerCredentials::current(), is_admin)
    }

    fn sample(temp_dir: &TempDir) -> (PathBuf, ManifestDigest) {
        let dir = temp_dir.path().join("source");
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/data"), "payload").unwrap();
        let id = generate(&dir, ManifestFormat::Sha256New)
            .unwrap()
            .calculate_digest()
            .unwrap();
        (dir, ManifestDigest::from_id(&id).unwrap())
    }

    #[test]
    fn test_contribute_through_session() {
        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);
        let (source, digest) = sample(&temp_dir);

        let session = store.session(&me(false));
        let outcome = session.add_directory(&source, &digest).unwrap();
        assert!(!outcome.is_already_present());
        assert!(session.contains(&digest));
        session.verify(&digest).unwrap();

        // Stage, commit and verify were all recorded
        assert!(store.audit_len() >= 3);
    }

    #[test]
    fn test_remove_requires_admin() {
        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);
        let (source, digest) = sample(&temp_dir);
        store.session(&me(false)).add_directory(&source, &digest).unwrap();

        let err = store.session(&me(false)).remove(&digest).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(store.inner().contains(&digest));
        assert!(store.recent_audit(1)[0].contains("DENIED"));

        store.session(&me(true)).remove(&digest).unwrap();
        assert!(!store.inner().contains(&digest));
    }

    #[test]
    fn test_optimise_requires_admin() {
        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);

        assert!(matches!(
            store.session(&me(false)).optimise(),
            Err(Error::PermissionDenied(_))
        ));
        assert_eq!(store.session(&me(true)).optimise().unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_resets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let inner = DirectoryStore::new(temp_dir.path().join("shared"))
            .unwrap()
            .with_write_protection(false);
        let store = SecureStore::new(inner, ServiceIdentity::current());
        let (source, digest) = sample(&temp_dir);
        fs::set_permissions(source.join("lib/data"), fs::Permissions::from_mode(0o600)).unwrap();

        let path = store
            .session(&me(false))
            .add_directory(&source, &digest)
            .unwrap()
            .path()
            .to_path_buf();

        let mode = fs::metadata(path.join("lib/data")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        let mode = fs::metadata(path.join("lib")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_mismatch_discards_staging() {
        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);
        let (source, _) = sample(&temp_dir);
        let wrong = ManifestDigest::from_id(
            "sha256new_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
        )
        .unwrap();

        let session = store.session(&me(false));
        assert!(matches!(
            session.add_directory(&source, &wrong),
            Err(Error::DigestMismatch { .. })
        ));
        assert!(store.inner().list_all_temp().unwrap().is_empty());
    }

    fn someone_else() -> SecurityContext {
        let mine = PeerCredentials::current();
        let other = PeerCredentials {
            pid: mine.pid + 1,
            uid: mine.uid.wrapping_add(1),
            gid: mine.gid,
        };
        SecurityContext::new(other, false)
    }

    #[test]
    fn test_staging_belongs_to_its_creator() {
        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);
        let (source, digest) = sample(&temp_dir);

        let alice = store.session(&me(false));
        let staging = alice.stage_new().unwrap();
        filesystem::copy_dir(&source, &staging.path).unwrap();

        let bob = store.session(&someone_else());
        assert!(matches!(bob.list_all_temp(), Err(Error::PermissionDenied(_))));
        assert!(matches!(
            bob.discard_staging(&staging),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            bob.verify_and_commit(&staging, &digest),
            Err(Error::PermissionDenied(_))
        ));
        assert!(staging.path.join("lib/data").is_file());
        assert!(!store.inner().contains(&digest));
        assert!(store.recent_audit(1)[0].contains("DENIED"));

        let outcome = alice.verify_and_commit(&staging, &digest).unwrap();
        assert!(!outcome.is_already_present());
        assert!(!staging.path.exists());

        // Once committed the id is gone, even for its creator
        assert!(alice.discard_staging(&staging).is_err());
        assert_eq!(store.session(&me(true)).list_all_temp().unwrap(), Vec::<PathBuf>::new());
    }

    #[test]
    fn test_admin_may_discard_any_staging() {
        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);

        let staging = store.session(&me(false)).stage_new().unwrap();
        let admin = SecurityContext::new(someone_else().caller, true);
        store.session(&admin).discard_staging(&staging).unwrap();
        assert!(!staging.path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_linked_file_is_refused_untouched() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);
        let (_, digest) = sample(&temp_dir);
        let victim = temp_dir.path().join("victim");
        fs::write(&victim, b"secret").unwrap();
        fs::set_permissions(&victim, fs::Permissions::from_mode(0o600)).unwrap();

        let session = store.session(&me(false));
        let staging = session.stage_new().unwrap();
        fs::create_dir(staging.path.join("lib")).unwrap();
        fs::hard_link(&victim, staging.path.join("lib/data")).unwrap();

        let err = session.verify_and_commit(&staging, &digest).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        let mode = fs::metadata(&victim).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&victim).unwrap(), b"secret");
        assert!(store.inner().list_all_temp().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_open_descriptor_cannot_alter_commit() {
        use std::io::Write;

        let temp_dir = TempDir::new().unwrap();
        let inner = DirectoryStore::new(temp_dir.path().join("shared"))
            .unwrap()
            .with_write_protection(false);
        let store = SecureStore::new(inner, ServiceIdentity::current());
        let (source, digest) = sample(&temp_dir);

        let session = store.session(&me(false));
        let staging = session.stage_new().unwrap();
        filesystem::copy_dir(&source, &staging.path).unwrap();
        let mut kept = fs::OpenOptions::new()
            .append(true)
            .open(staging.path.join("lib/data"))
            .unwrap();

        let path = session
            .verify_and_commit(&staging, &digest)
            .unwrap()
            .path()
            .to_path_buf();
        kept.write_all(b" tampered").unwrap();

        assert_eq!(fs::read(path.join("lib/data")).unwrap(), b"payload");
        store.inner().verify(&digest).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_in_staging_fails_promptly() {
        use nix::sys::stat::Mode;

        let temp_dir = TempDir::new().unwrap();
        let store = secure_store(&temp_dir);
        let (source, digest) = sample(&temp_dir);

        let session = store.session(&me(false));
        let staging = session.stage_new().unwrap();
        nix::unistd::mkfifo(&staging.path.join("pipe"), Mode::S_IRUSR | Mode::S_IWUSR).unwrap();

        let err = session.verify_and_commit(&staging, &digest).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(store.inner().list_all_temp().unwrap().is_empty());

        // The commit lock was released
        session.add_directory(&source, &digest).unwrap();
    }
}
