// src/service/client.rs

//! Unprivileged side of the store service
//!
//! [`ServiceClient`] implements [`ImplementationStore`] by forwarding every
//! operation over the service socket, so it can sit inside a
//! [`crate::store::CompositeStore`] like any local store. Staging directories
//! handed out by the service belong to the calling user, which lets the
//! default `add_directory`/`add_archives` fill them in-process before asking
//! the service to verify and commit.

use super::protocol::{read_message, write_message, Request, Response};
use crate::error::{Error, Result};
use crate::manifest::ManifestDigest;
use crate::store::{CommitOutcome, ImplementationStore, StagingDir};
use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Client for a store service socket
#[derive(Debug, Clone)]
pub struct ServiceClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ServiceClient {
    /// Create a client; nothing is connected until the first request
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            // Verification of large trees happens inside a single request
            timeout: Duration::from_secs(600),
        }
    }

    /// Set read and write timeout per request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and wait for its answer
    pub fn call(&self, request: &Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            Error::Service(format!(
                "Cannot reach store service at {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut writer = &stream;
        write_message(&mut writer, request)?;

        let mut reader = BufReader::new(&stream);
        let response: Response = read_message(&mut reader)?.ok_or_else(|| {
            Error::Service("Store service closed the connection without answering".to_string())
        })?;
        response.into_result()
    }

    fn unexpected(response: Response) -> Error {
        Error::Service(format!("Unexpected answer from store service: {:?}", response))
    }
}

impl ImplementationStore for ServiceClient {
    fn describe(&self) -> String {
        format!("service:{}", self.socket_path.display())
    }

    fn contains(&self, digest: &ManifestDigest) -> bool {
        match self.call(&Request::Contains {
            digest: digest.clone(),
        }) {
            Ok(Response::Contains { present }) => present,
            Ok(other) => {
                debug!("{}", Self::unexpected(other));
                false
            }
            Err(e) => {
                debug!("Store service lookup failed: {}", e);
                false
            }
        }
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        match self.call(&Request::GetPath {
            digest: digest.clone(),
        })? {
            Response::Path { path } => Ok(path),
            other => Err(Self::unexpected(other)),
        }
    }

    fn stage_new(&self) -> Result<StagingDir> {
        match self.call(&Request::Stage)? {
            Response::Staged { staging } => Ok(staging),
            other => Err(Self::unexpected(other)),
        }
    }

    fn verify_and_commit(
        &self,
        staging: &StagingDir,
        expected: &ManifestDigest,
    ) -> Result<CommitOutcome> {
        match self.call(&Request::VerifyAndCommit {
            staging: staging.clone(),
            digest: expected.clone(),
        })? {
            Response::Committed { outcome } => Ok(outcome),
            other => Err(Self::unexpected(other)),
        }
    }

    fn discard_staging(&self, staging: &StagingDir) -> Result<()> {
        match self.call(&Request::Discard {
            staging: staging.clone(),
        })? {
            Response::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        match self.call(&Request::Remove {
            digest: digest.clone(),
        })? {
            Response::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        match self.call(&Request::List)? {
            Response::Digests { digests } => Ok(digests),
            other => Err(Self::unexpected(other)),
        }
    }

    fn list_all_temp(&self) -> Result<Vec<PathBuf>> {
        match self.call(&Request::ListTemp)? {
            Response::Paths { paths } => Ok(paths),
            other => Err(Self::unexpected(other)),
        }
    }

    fn optimise(&self) -> Result<u64> {
        match self.call(&Request::Optimise)? {
            Response::Reclaimed { bytes } => Ok(bytes),
            other => Err(Self::unexpected(other)),
        }
    }

    fn verify(&self, digest: &ManifestDigest) -> Result<()> {
        match self.call(&Request::Verify {
            digest: digest.clone(),
        })? {
            Response::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }
}
