// src/service/auth.rs

//! Authentication and authorization for the store service
//!
//! Provides:
//! - Peer credential extraction (SO_PEERCRED)
//! - Permission checking (administrators vs ordinary users)
//! - Audit logging
//!
//! # Security Model
//!
//! - **Root users** (UID 0) and members of trusted groups: full access,
//!   including removal and optimisation of shared entries
//! - **Other users**: may query, verify and contribute new implementations
//!   through staging and verified commit, but never delete or rewrite
//!   existing ones

use std::io;
use std::os::unix::net::UnixStream;

/// Peer credentials from a Unix socket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Process ID of the peer
    pub pid: u32,
    /// User ID of the peer
    pub uid: u32,
    /// Group ID of the peer
    pub gid: u32,
}

impl PeerCredentials {
    /// Extract peer credentials from a Unix stream
    ///
    /// Uses SO_PEERCRED socket option to get the UID/GID of the connected process.
    pub fn from_stream(stream: &UnixStream) -> io::Result<Self> {
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;

            let fd = stream.as_raw_fd();

            let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

            // SAFETY: `cred` and `len` are valid for writes and sized for ucred
            let result = unsafe {
                libc::getsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_PEERCRED,
                    &mut cred as *mut _ as *mut libc::c_void,
                    &mut len,
                )
            };

            if result == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(PeerCredentials {
                pid: cred.pid as u32,
                uid: cred.uid,
                gid: cred.gid,
            })
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = stream;
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Peer credentials not supported on this platform",
            ))
        }
    }

    /// Credentials of the current process
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
        }
    }

    /// Check if the peer is running as root
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Permission level for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// Denied
    Denied,
    /// Queries, verification and adding new implementations
    Contribute,
    /// Full access (all operations)
    Full,
}

/// Actions that require authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Lookups and listings
    Query,
    /// Allocate a staging directory
    Stage,
    /// Verify a staged tree and commit it
    Commit,
    /// Re-check an existing entry
    Verify,
    /// Delete an entry
    Remove,
    /// Hard-link duplicate files across entries
    Optimise,
}

impl Action {
    /// Whether only administrators may perform this action
    pub fn requires_admin(&self) -> bool {
        matches!(self, Action::Remove | Action::Optimise)
    }
}

/// Authorization checker
pub struct AuthChecker {
    /// GIDs whose members get full access
    trusted_gids: Vec<u32>,
    /// Whether ordinary users may add implementations
    allow_contributions: bool,
}

impl Default for AuthChecker {
    fn default() -> Self {
        Self {
            trusted_gids: vec![0, 10, 27], // root, wheel, sudo
            allow_contributions: true,
        }
    }
}

impl AuthChecker {
    /// Create a new authorization checker
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the trusted GIDs
    pub fn with_trusted_gids(mut self, gids: Vec<u32>) -> Self {
        self.trusted_gids = gids;
        self
    }

    /// Only administrators may add implementations
    pub fn disable_contributions(mut self) -> Self {
        self.allow_contributions = false;
        self
    }

    /// Whether the peer has administrative rights
    pub fn is_admin(&self, creds: &PeerCredentials) -> bool {
        creds.is_root() || self.trusted_gids.contains(&creds.gid)
    }

    /// Check permission for an action
    pub fn check(&self, creds: &PeerCredentials, action: Action) -> Permission {
        if self.is_admin(creds) {
            return Permission::Full;
        }

        if action.requires_admin() {
            return Permission::Denied;
        }

        match action {
            Action::Stage | Action::Commit if !self.allow_contributions => Permission::Denied,
            _ => Permission::Contribute,
        }
    }

    /// Check if an action is allowed (convenience method)
    pub fn is_allowed(&self, creds: &PeerCredentials, action: Action) -> bool {
        self.check(creds, action) != Permission::Denied
    }
}

/// Audit log entry
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Peer credentials
    pub credentials: PeerCredentials,
    /// Action attempted
    pub action: Action,
    /// Whether the action was allowed and succeeded
    pub allowed: bool,
    /// Additional details
    pub details: Option<String>,
}

impl AuditEntry {
    /// Create a new audit entry
    pub fn new(credentials: PeerCredentials, action: Action, allowed: bool) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            credentials,
            action,
            allowed,
            details: None,
        }
    }

    /// Add details to the entry
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Format as log message
    pub fn to_log_message(&self) -> String {
        let allowed_str = if self.allowed { "ALLOWED" } else { "DENIED" };
        let details_str = self.details.as_deref().unwrap_or("");

        format!(
            "[{}] {} {:?} uid={} gid={} pid={} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            allowed_str,
            self.action,
            self.credentials.uid,
            self.credentials.gid,
            self.credentials.pid,
            details_str
        )
    }
}

/// Audit logger
pub struct AuditLogger {
    /// Log entries (in-memory history)
    entries: Vec<AuditEntry>,
    /// Maximum number of entries to keep
    max_entries: usize,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            max_entries: 10000,
        }
    }
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of entries to keep
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Log an audit entry
    pub fn log(&mut self, entry: AuditEntry) {
        let msg = entry.to_log_message();
        if entry.allowed {
            log::info!("AUDIT: {}", msg);
        } else {
            log::warn!("AUDIT: {}", msg);
        }

        self.entries.push(entry);

        if self.entries.len() > self.max_entries {
            let drain_count = self.entries.len() - self.max_entries;
            self.entries.drain(0..drain_count);
        }
    }

    /// Log an action outcome
    pub fn log_action(
        &mut self,
        credentials: PeerCredentials,
        action: Action,
        allowed: bool,
        details: Option<&str>,
    ) {
        let mut entry = AuditEntry::new(credentials, action, allowed);
        if let Some(d) = details {
            entry = entry.with_details(d);
        }
        self.log(entry);
    }

    /// Get recent audit entries
    pub fn recent_entries(&self, count: usize) -> &[AuditEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }

    /// Get all entries
    pub fn all_entries(&self) -> &[AuditEntry] {
        &self.entries
    }
}
