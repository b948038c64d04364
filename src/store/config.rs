// src/store/config.rs

//! Store configuration and the store factory
//!
//! Configuration comes from `<config_dir>/zerostore/config.toml`:
//!
//! ```toml
//! implementation_dirs = ["/home/me/.cache/0install.net/implementations"]
//! service_socket = "/run/zerostore/store.sock"
//! write_protect = true
//! ```
//!
//! Plain `implementation-dirs` files (one directory per line) in the user and
//! system `0install.net/injector` config directories add further caches.

use super::composite::CompositeStore;
use super::directory::DirectoryStore;
use super::ImplementationStore;
use crate::error::{Error, Result};
use crate::service::ServiceClient;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the legacy directory list file
pub const LEGACY_DIRS_FILE: &str = "implementation-dirs";

const MACHINE_CACHE: &str = "/var/cache/0install.net/implementations";
const SYSTEM_CONFIG: &str = "/etc/xdg/0install.net/injector";

/// Which caches to use and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Cache directories, most specific first; empty means the defaults
    #[serde(default)]
    pub implementation_dirs: Vec<PathBuf>,

    /// Socket of a privileged store service to write through
    #[serde(default)]
    pub service_socket: Option<PathBuf>,

    /// Make committed entries read-only
    #[serde(default = "default_write_protect")]
    pub write_protect: bool,
}

fn default_write_protect() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            implementation_dirs: Vec::new(),
            service_socket: None,
            write_protect: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config_dir>/zerostore/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("zerostore").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the user's configuration and resolve the full directory list
    ///
    /// Configured directories (or the defaults) come first, followed by any
    /// listed in legacy `implementation-dirs` files.
    pub fn load_default() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };

        if config.implementation_dirs.is_empty() {
            config.implementation_dirs = default_implementation_dirs();
        }
        for file in legacy_config_files() {
            if !file.is_file() {
                continue;
            }
            let content = fs::read_to_string(&file)?;
            for dir in parse_legacy_dirs(&content, |name| std::env::var(name).ok())? {
                if !config.implementation_dirs.contains(&dir) {
                    config.implementation_dirs.push(dir);
                }
            }
        }
        Ok(config)
    }

    /// Replace the directory list
    pub fn with_implementation_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.implementation_dirs = dirs;
        self
    }

    pub fn with_service_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.service_socket = Some(socket.into());
        self
    }

    pub fn with_write_protection(mut self, write_protect: bool) -> Self {
        self.write_protect = write_protect;
        self
    }

    /// Check that every path is absolute
    pub fn validate(&self) -> Result<()> {
        for dir in &self.implementation_dirs {
            if !dir.is_absolute() {
                return Err(Error::Config(format!(
                    "Implementation directory must be absolute: {}",
                    dir.display()
                )));
            }
        }
        if let Some(socket) = &self.service_socket
            && !socket.is_absolute()
        {
            return Err(Error::Config(format!(
                "Service socket must be absolute: {}",
                socket.display()
            )));
        }
        Ok(())
    }
}

/// User cache, then the machine-wide cache
pub fn default_implementation_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(cache) = dirs::cache_dir() {
        dirs.push(cache.join("0install.net").join("implementations"));
    }
    dirs.push(PathBuf::from(MACHINE_CACHE));
    dirs
}

fn legacy_config_files() -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(config) = dirs::config_dir() {
        files.push(config.join("0install.net").join("injector").join(LEGACY_DIRS_FILE));
    }
    files.push(Path::new(SYSTEM_CONFIG).join(LEGACY_DIRS_FILE));
    files
}

/// Parse an `implementation-dirs` file
///
/// Blank lines and `#` comments are skipped, `$VAR` and `${VAR}` are
/// expanded through `lookup` (unknown variables expand to nothing).
pub fn parse_legacy_dirs<F>(content: &str, lookup: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut dirs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let expanded = expand_vars(line, &lookup);
        let path = PathBuf::from(&expanded);
        if !path.is_absolute() {
            return Err(Error::Config(format!(
                "Implementation directory must be absolute: {}",
                expanded
            )));
        }
        dirs.push(path);
    }
    Ok(dirs)
}

fn expand_vars<F>(input: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            output.push(c);
            continue;
        }

        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }

        if name.is_empty() {
            output.push('$');
        } else {
            output.push_str(&lookup(&name).unwrap_or_default());
        }
    }
    output
}

/// Build the store described by `config`
///
/// The service (when its socket exists) comes first so new content lands in
/// the shared cache. The first directory is created on demand; later ones
/// are used only if they already exist.
pub fn open_store(config: &StoreConfig) -> Result<CompositeStore> {
    config.validate()?;
    let mut stores: Vec<Box<dyn ImplementationStore>> = Vec::new();

    if let Some(socket) = &config.service_socket {
        if socket.exists() {
            stores.push(Box::new(ServiceClient::new(socket)));
        } else {
            warn!("Store service socket {} does not exist", socket.display());
        }
    }

    for (index, dir) in config.implementation_dirs.iter().enumerate() {
        let store = if index == 0 {
            DirectoryStore::new(dir)?
        } else {
            match DirectoryStore::open_existing(dir) {
                Ok(store) => store,
                Err(e) => {
                    debug!("Skipping {}: {}", dir.display(), e);
                    continue;
                }
            }
        };
        stores.push(Box::new(store.with_write_protection(config.write_protect)));
    }

    if stores.is_empty() {
        return Err(Error::Config("No implementation stores configured".to_string()));
    }
    Ok(CompositeStore::new(stores))
}
