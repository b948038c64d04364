// src/service/protocol.rs

//! Wire protocol between store clients and the store service
//!
//! One request per connection: the client writes a single JSON object
//! terminated by `\n`, the service answers with a single JSON line and
//! closes the connection.

use super::auth::Action;
use crate::error::{Error, ErrorKind, Result};
use crate::manifest::ManifestDigest;
use crate::store::{CommitOutcome, StagingDir};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// Longest accepted message line
pub const MAX_MESSAGE_SIZE: u64 = 1024 * 1024;

/// Store operation requested by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Contains { digest: ManifestDigest },
    GetPath { digest: ManifestDigest },
    Stage,
    VerifyAndCommit {
        staging: StagingDir,
        digest: ManifestDigest,
    },
    Discard { staging: StagingDir },
    Remove { digest: ManifestDigest },
    List,
    ListTemp,
    Verify { digest: ManifestDigest },
    Optimise,
}

impl Request {
    /// Authorization class of this request
    pub fn action(&self) -> Action {
        match self {
            Self::Contains { .. } | Self::GetPath { .. } | Self::List | Self::ListTemp => {
                Action::Query
            }
            Self::Stage | Self::Discard { .. } => Action::Stage,
            Self::VerifyAndCommit { .. } => Action::Commit,
            Self::Remove { .. } => Action::Remove,
            Self::Verify { .. } => Action::Verify,
            Self::Optimise => Action::Optimise,
        }
    }
}

/// Service answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Contains { present: bool },
    Path { path: PathBuf },
    Staged { staging: StagingDir },
    Committed { outcome: CommitOutcome },
    Done,
    Digests { digests: Vec<ManifestDigest> },
    Paths { paths: Vec<PathBuf> },
    Reclaimed { bytes: u64 },
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Turn an error answer back into an [`Error`]
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Error { kind, message } => Err(Error::from_remote(kind, message)),
            other => Ok(other),
        }
    }
}

/// Write one message line
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| Error::Service(format!("Failed to encode message: {}", e)))?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Read one message line; `None` on a cleanly closed connection
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    let read = reader.take(MAX_MESSAGE_SIZE + 1).read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if read as u64 > MAX_MESSAGE_SIZE {
        return Err(Error::Service("Message too large".to_string()));
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| Error::Service(format!("Malformed message: {}", e)))
}
