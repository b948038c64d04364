// src/lib.rs

//! Zerostore implementation cache
//!
//! A content-addressed store for unpacked software trees. Every entry lives
//! in a directory named after the digest of its manifest, so an entry can
//! always be re-checked against its own name.
//!
//! # Architecture
//!
//! - Stage, verify, commit: nothing enters the cache before its digest has
//!   been recomputed, and the final step is an atomic rename
//! - Stores compose: a user cache, read-only machine caches and a
//!   privilege-separated service sit behind one `ImplementationStore` trait
//! - Fetching tries each retrieval method in a fixed order and keeps a
//!   record of every failed attempt
//! - Executable bits and symlinks survive filesystems that lack them via
//!   `.xbit` and `.symlink` flag files

pub mod archive;
pub mod cancel;
mod error;
pub mod fetch;
pub mod filesystem;
pub mod flags;
pub mod hash;
pub mod manifest;
pub mod progress;
pub mod service;
pub mod store;

pub use cancel::CancellationToken;
pub use error::{Error, ErrorKind, Result};
pub use fetch::{FetchFailure, FetchOutcome, FetchStatus, Fetcher, Implementation};
pub use hash::{HashAlgorithm, Hasher};
pub use manifest::{Manifest, ManifestDigest, ManifestFormat};
pub use progress::{CliProgress, LogProgress, ProgressStyle, ProgressTracker, SilentProgress};
pub use store::{CommitOutcome, CompositeStore, DirectoryStore, ImplementationStore, StoreConfig};
