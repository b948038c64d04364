// src/service/mod.rs

//! Privilege-separated store service
//!
//! A machine-wide cache is owned by a service identity. Unprivileged users
//! reach it through a Unix socket:
//!
//! - [`protocol`]: JSON line request/response messages
//! - [`server`]: the service loop, one thread per connection
//! - [`client`]: [`ServiceClient`], an [`crate::store::ImplementationStore`]
//!   that forwards to the service
//! - [`auth`]: peer credentials, authorization and the audit log

pub mod auth;
pub mod client;
pub mod protocol;
pub mod server;

pub use client::ServiceClient;
pub use server::StoreServer;

use std::path::PathBuf;
use std::time::Duration;

/// Store service settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Path of the Unix socket
    pub socket_path: PathBuf,
    /// Socket file permissions
    pub socket_mode: u32,
    /// Root of the shared cache
    pub store_root: PathBuf,
    /// Members of these groups may remove and optimise
    pub admin_gids: Vec<u32>,
    /// Audit entries kept in memory
    pub audit_history: usize,
    /// Whether ordinary users may add implementations
    pub allow_contributions: bool,
    /// How long a client may take to send its request
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/zerostore/store.sock"),
            socket_mode: 0o660,
            store_root: PathBuf::from("/var/cache/0install.net/implementations"),
            admin_gids: vec![0, 10, 27],
            audit_history: 10000,
            allow_contributions: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store_root = root.into();
        self
    }

    pub fn with_admin_gids(mut self, gids: Vec<u32>) -> Self {
        self.admin_gids = gids;
        self
    }

    pub fn with_audit_history(mut self, entries: usize) -> Self {
        self.audit_history = entries;
        self
    }

    pub fn with_contributions(mut self, allow: bool) -> Self {
        self.allow_contributions = allow;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_builders() {
        let config = ServiceConfig::new()
            .with_socket_path("/tmp/zs.sock")
            .with_socket_mode(0o666)
            .with_admin_gids(vec![500])
            .with_audit_history(10)
            .with_contributions(false)
            .with_request_timeout(Duration::from_millis(250));

        assert_eq!(config.socket_path, PathBuf::from("/tmp/zs.sock"));
        assert_eq!(config.socket_mode, 0o666);
        assert_eq!(config.admin_gids, vec![500]);
        assert_eq!(config.audit_history, 10);
        assert!(!config.allow_contributions);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(ServiceConfig::default().socket_mode, 0o660);
    }
}
