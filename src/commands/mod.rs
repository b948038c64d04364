// src/commands/mod.rs
//! Command handlers for the zerostore CLI

mod fetch;
mod service;
mod store;

pub use fetch::cmd_fetch;
pub use service::{cmd_completions, cmd_serve};
pub use store::{
    cmd_add, cmd_audit, cmd_copy, cmd_find, cmd_list, cmd_manifest, cmd_optimise, cmd_purge,
    cmd_remove, cmd_verify,
};

use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use zerostore::store::open_store;
use zerostore::{CompositeStore, Error, ErrorKind, Result, StoreConfig};

/// Process exit status of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok = 0,
    Canceled = 1,
    InvalidArguments = 2,
    NotSupported = 3,
    IoError = 10,
    NotFound = 15,
    DigestMismatch = 20,
    PermissionDenied = 25,
}

impl ExitStatus {
    /// Exit status reporting `error`
    pub fn for_error(error: &Error) -> Self {
        match error.kind() {
            ErrorKind::Canceled => Self::Canceled,
            ErrorKind::InvalidInput => Self::InvalidArguments,
            ErrorKind::Unsupported | ErrorKind::Misconfiguration => Self::NotSupported,
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::DigestMismatch => Self::DigestMismatch,
            ErrorKind::PermissionDenied => Self::PermissionDenied,
            ErrorKind::Io | ErrorKind::SizeMismatch | ErrorKind::ArchiveInvalid | ErrorKind::Other => {
                Self::IoError
            }
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Open the configured stores, or only `dirs` when given
pub fn open_cli_store(dirs: &[PathBuf]) -> Result<CompositeStore> {
    let mut config = StoreConfig::load_default()?;
    if !dirs.is_empty() {
        let dirs = dirs
            .iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<Vec<_>>>()?;
        debug!("Using stores from the command line: {:?}", dirs);
        config = StoreConfig::new()
            .with_implementation_dirs(dirs)
            .with_write_protection(config.write_protect);
    }
    open_store(&config)
}
