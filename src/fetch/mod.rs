// src/fetch/mod.rs

//! Fetch pipeline: download, extract, verify, commit
//!
//! For one implementation the [`Fetcher`] tries its retrieval methods in
//! ranked order, strictly one after another:
//!
//! - **Archive**: download to a temporary file, check the byte count, then
//!   extract into a staging directory and commit
//! - **Recipe**: download every step first, then extract all of them into
//!   one staging directory and commit once
//!
//! A failed attempt is recorded as a [`Problem`] and the next method is
//! tried. Cancellation and store-level verdicts (digest mismatch, permission
//! denied, misconfiguration) end the fetch immediately. Batches run each
//! implementation on the rayon pool and report every failure.

pub mod model;
pub mod rank;
pub mod transport;

pub use model::{Archive, Implementation, Recipe, RecipeStep, RetrievalMethod};
pub use rank::rank;
pub use transport::{DefaultTransport, FileTransport, HttpTransport, Transport};

use crate::archive::LocalArchive;
use crate::cancel::CancellationToken;
use crate::error::{Error, ErrorKind, Result};
use crate::manifest::ManifestDigest;
use crate::progress::{ProgressStyle, ProgressTracker, SilentProgress};
use crate::store::{CommitOutcome, ImplementationStore};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Why one retrieval attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// The method that was attempted
    pub method: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl Problem {
    fn new(method: &RetrievalMethod, error: &Error) -> Self {
        Self {
            method: method.describe(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.method, self.message)
    }
}

/// How a successful fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Committed,
    AlreadyPresent,
}

/// Result of fetching one implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub digest: ManifestDigest,
    pub status: FetchStatus,
    pub path: PathBuf,
    /// Failed attempts before the one that succeeded, in attempt order
    pub problems: Vec<Problem>,
}

/// An implementation that could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub digest: ManifestDigest,
    /// One entry per failed attempt, in attempt order
    pub problems: Vec<Problem>,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest)?;
        for problem in &self.problems {
            write!(f, "\n  - {}", problem)?;
        }
        Ok(())
    }
}

/// Errors that end a fetch instead of moving on to the next method
fn is_fatal(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Canceled
            | ErrorKind::DigestMismatch
            | ErrorKind::PermissionDenied
            | ErrorKind::Misconfiguration
    )
}

/// Downloads implementations into a store
pub struct Fetcher<'a> {
    store: &'a dyn ImplementationStore,
    transport: &'a dyn Transport,
    progress: Option<&'a dyn ProgressTracker>,
    temp_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl<'a> Fetcher<'a> {
    pub fn new(store: &'a dyn ImplementationStore, transport: &'a dyn Transport) -> Self {
        Self {
            store,
            transport,
            progress: None,
            temp_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report overall and per-download progress here
    pub fn with_progress(mut self, progress: &'a dyn ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Put downloads in this directory instead of the system temp dir
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch one implementation
    ///
    /// Fails with [`Error::FetchFailed`] carrying one problem per attempted
    /// method when none of them works.
    pub fn fetch(&self, implementation: &Implementation) -> Result<FetchOutcome> {
        let digest = &implementation.digest;
        if let Ok(path) = self.store.get_path(digest) {
            debug!("{} is already cached at {}", digest, path.display());
            return Ok(FetchOutcome {
                digest: digest.clone(),
                status: FetchStatus::AlreadyPresent,
                path,
                problems: Vec::new(),
            });
        }

        let mut problems = Vec::new();
        for method in rank(&implementation.retrieval_methods) {
            self.cancel.check()?;
            debug!("Trying {} for {}", method.describe(), digest);

            match self.attempt(digest, method) {
                Ok(outcome) => {
                    let status = match outcome {
                        CommitOutcome::Committed(_) => FetchStatus::Committed,
                        CommitOutcome::AlreadyPresent(_) => FetchStatus::AlreadyPresent,
                    };
                    info!("Fetched {} via {}", digest, method.describe());
                    return Ok(FetchOutcome {
                        digest: digest.clone(),
                        status,
                        path: outcome.path().to_path_buf(),
                        problems,
                    });
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!("{} failed for {}: {}", method.describe(), digest, e);
                    problems.push(Problem::new(method, &e));
                }
            }
        }

        if problems.is_empty() {
            problems.push(Problem {
                method: "none".to_string(),
                kind: ErrorKind::NotFound,
                message: "No retrieval methods".to_string(),
            });
        }
        Err(Error::FetchFailed(vec![FetchFailure {
            digest: digest.clone(),
            problems,
        }]))
    }

    /// Fetch several implementations in parallel
    ///
    /// Every implementation is attempted; the call fails afterwards if any
    /// of them failed, listing all failures.
    pub fn fetch_all(&self, implementations: &[Implementation]) -> Result<Vec<FetchOutcome>> {
        let overall = self.progress;
        if let Some(progress) = overall {
            progress.set_length(implementations.len() as u64);
        }

        let results: Vec<Result<FetchOutcome>> = implementations
            .par_iter()
            .map(|implementation| {
                let result = self.fetch(implementation);
                if let Some(progress) = overall {
                    progress.increment(1);
                }
                result
            })
            .collect();

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        let mut canceled = false;
        for (implementation, result) in implementations.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(Error::FetchFailed(mut failed)) => failures.append(&mut failed),
                Err(Error::Canceled) => canceled = true,
                Err(e) => failures.push(FetchFailure {
                    digest: implementation.digest.clone(),
                    problems: vec![Problem {
                        method: "fetch".to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    }],
                }),
            }
        }

        if canceled {
            return Err(Error::Canceled);
        }
        if !failures.is_empty() {
            return Err(Error::FetchFailed(failures));
        }
        Ok(outcomes)
    }

    fn attempt(&self, digest: &ManifestDigest, method: &RetrievalMethod) -> Result<CommitOutcome> {
        let archives: Vec<&Archive> = match method {
            RetrievalMethod::Archive(archive) => vec![archive],
            RetrievalMethod::Recipe(recipe) => {
                if recipe.steps.is_empty() {
                    return Err(Error::UnsupportedFormat("Recipe without steps".to_string()));
                }
                recipe
                    .steps
                    .iter()
                    .map(|step| match step {
                        RecipeStep::Archive(archive) => Ok(archive),
                        RecipeStep::Unsupported => {
                            Err(Error::UnsupportedFormat("Unsupported recipe step".to_string()))
                        }
                    })
                    .collect::<Result<_>>()?
            }
        };

        // Fail fast before downloading anything
        let formats = archives
            .iter()
            .map(|archive| archive.resolve_format())
            .collect::<Result<Vec<_>>>()?;

        // Downloads are deleted when these handles drop, whatever happens
        let mut downloads: Vec<NamedTempFile> = Vec::with_capacity(archives.len());
        for archive in &archives {
            downloads.push(self.download(archive)?);
        }

        let local: Vec<LocalArchive> = archives
            .iter()
            .zip(&formats)
            .zip(&downloads)
            .map(|((archive, format), file)| {
                LocalArchive::new(file.path(), format.mime_type())
                    .with_sub_dir(archive.extract.clone())
                    .with_destination(archive.destination.clone())
                    .with_start_offset(archive.start_offset)
            })
            .collect();

        self.store.add_archives(&local, digest, &self.cancel)
    }

    fn download(&self, archive: &Archive) -> Result<NamedTempFile> {
        let expected = archive.download_size()?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("zerostore-fetch-");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let bar: Box<dyn ProgressTracker> = match self.progress {
            Some(progress) => progress.child(&archive.href, expected, ProgressStyle::Bytes),
            None => Box::new(SilentProgress::new()),
        };

        let mut bounded = SizeLimited::new(file.as_file_mut(), expected);
        let result = self
            .transport
            .download(&archive.href, &mut bounded, bar.as_ref(), &self.cancel);
        let result = match (bounded.overflow, result) {
            (Some(actual), _) | (None, Ok(actual)) if actual != expected => {
                Err(Error::SizeMismatch {
                    location: archive.href.clone(),
                    expected,
                    actual,
                })
            }
            (_, result) => result,
        };

        match result {
            Ok(_) => {
                bar.finish_with_message(&archive.href);
                Ok(file)
            }
            Err(e) => {
                let message = match &e {
                    Error::SizeMismatch { .. } => "size mismatch".to_string(),
                    other => other.to_string(),
                };
                bar.finish_with_error(&message);
                Err(e)
            }
        }
    }
}

/// Writer that refuses to grow a download past its declared size
struct SizeLimited<'a> {
    inner: &'a mut dyn Write,
    limit: u64,
    written: u64,
    /// Size the download would have reached when it was cut off
    overflow: Option<u64>,
}

impl<'a> SizeLimited<'a> {
    fn new(inner: &'a mut dyn Write, limit: u64) -> Self {
        Self {
            inner,
            limit,
            written: 0,
            overflow: None,
        }
    }
}

impl Write for SizeLimited<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let attempted = self.written.saturating_add(buf.len() as u64);
        if attempted > self.limit {
            self.overflow = Some(attempted);
            return Err(io::Error::other("download is larger than its declared size"));
        }
        let written = self.inner.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
