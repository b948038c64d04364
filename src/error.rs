// src/error.rs

//! Error types for the implementation store
//!
//! Every fallible operation in the crate returns [`Result`]. Each variant maps
//! onto an [`ErrorKind`], which is what the CLI turns into an exit code and what
//! crosses the privilege-separation boundary when the store service reports a
//! failure back to an unprivileged client.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Store, extraction and fetch errors
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem or transport failure described by a message
    #[error("I/O error: {0}")]
    IoError(String),

    /// Content does not hash to the expected digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        expected: String,
        actual: String,
        /// Manifest text of the expected tree, when known
        expected_manifest: Option<String>,
        /// Manifest text of the tree that was actually found
        actual_manifest: Option<String>,
    },

    /// Downloaded byte count differs from the declared size
    #[error("Size mismatch for {location}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        location: String,
        expected: u64,
        actual: u64,
    },

    /// Corrupt or structurally unsafe archive
    #[error("Invalid archive: {0}")]
    ArchiveInvalid(String),

    /// Archive type or retrieval step the store cannot handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Digest absent from the store
    #[error("Implementation not found: {0}")]
    NotFound(String),

    /// Privilege boundary violation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Cooperative cancellation was honoured
    #[error("Operation canceled")]
    Canceled,

    /// Digest algorithms do not overlap with what the store can compute
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by, or while talking to, the store service
    #[error("Store service error: {0}")]
    Service(String),

    /// One or more implementations of a batch fetch failed
    #[error("Failed to fetch {} implementation(s)", .0.len())]
    FetchFailed(Vec<crate::fetch::FetchFailure>),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    DigestMismatch,
    SizeMismatch,
    ArchiveInvalid,
    Unsupported,
    NotFound,
    PermissionDenied,
    Canceled,
    Misconfiguration,
    InvalidInput,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Io => "io",
            Self::DigestMismatch => "digest_mismatch",
            Self::SizeMismatch => "size_mismatch",
            Self::ArchiveInvalid => "archive_invalid",
            Self::Unsupported => "unsupported",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Canceled => "canceled",
            Self::Misconfiguration => "misconfiguration",
            Self::InvalidInput => "invalid_input",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorKind::PermissionDenied
            }
            Self::Io(_) | Self::IoError(_) | Self::DownloadError(_) | Self::Service(_) => {
                ErrorKind::Io
            }
            Self::DigestMismatch { .. } => ErrorKind::DigestMismatch,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::ArchiveInvalid(_) => ErrorKind::ArchiveInvalid,
            Self::UnsupportedFormat(_) => ErrorKind::Unsupported,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Canceled => ErrorKind::Canceled,
            Self::Misconfiguration(_) => ErrorKind::Misconfiguration,
            Self::PathTraversal(_) | Self::InvalidPath(_) | Self::ParseError(_) => {
                ErrorKind::InvalidInput
            }
            Self::InitError(_) | Self::Config(_) | Self::FetchFailed(_) => ErrorKind::Other,
        }
    }

    /// Rebuild an error reported across the service boundary
    ///
    /// Structured payloads (both digests of a mismatch, sizes) do not survive
    /// the trip; the message does.
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Io => Self::Service(message),
            ErrorKind::DigestMismatch => Self::DigestMismatch {
                expected: message,
                actual: "(reported by store service)".to_string(),
                expected_manifest: None,
                actual_manifest: None,
            },
            ErrorKind::SizeMismatch => Self::DownloadError(message),
            ErrorKind::ArchiveInvalid => Self::ArchiveInvalid(message),
            ErrorKind::Unsupported => Self::UnsupportedFormat(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::PermissionDenied => Self::PermissionDenied(message),
            ErrorKind::Canceled => Self::Canceled,
            ErrorKind::Misconfiguration => Self::Misconfiguration(message),
            ErrorKind::InvalidInput => Self::InvalidPath(message),
            ErrorKind::Other => Self::Service(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_permission_denied_is_classified() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = Error::Io(std::io::Error::other("disk on fire"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_remote_round_trip_keeps_kind() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::ArchiveInvalid,
            ErrorKind::Misconfiguration,
            ErrorKind::DigestMismatch,
            ErrorKind::Canceled,
        ] {
            let err = Error::from_remote(kind, "detail".to_string());
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DigestMismatch).unwrap();
        assert_eq!(json, "\"digest_mismatch\"");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
