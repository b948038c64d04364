// src/cli/mod.rs
//! CLI definitions for the zerostore implementation cache
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! Cache commands:
//! - `add` / `copy` - Add an archive or directory under its digest
//! - `find` / `list` - Look up entries
//! - `remove` / `purge` - Delete entries
//! - `verify` / `audit` - Re-check entries against their digests
//! - `optimise` - Hard-link identical files across entries
//!
//! Tools:
//! - `manifest` - Print the manifest and digest of any directory
//! - `fetch` - Download implementations listed in a JSON file
//! - `serve` - Run the shared store service
//! - `completions` - Shell completion scripts

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "zerostore")]
#[command(author = "Zerostore Project")]
#[command(version)]
#[command(about = "Content-addressed cache of verified implementation trees", long_about = None)]
pub struct Cli {
    /// Cache directory; repeat to search several, the first one receives new entries
    #[arg(long = "store", value_name = "DIR", global = true)]
    pub stores: Vec<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add an archive or a directory under its digest
    Add {
        /// Expected digest, for example sha256new_ABC...
        digest: String,

        /// Archive file or directory to add
        source: PathBuf,

        /// Only extract this sub-directory of the archive
        extract: Option<String>,

        /// Archive MIME type (guessed from the file name if omitted)
        mime_type: Option<String>,
    },

    /// Copy a directory that is named after its own digest into the cache
    Copy {
        /// Directory named like sha256new_ABC...
        source: PathBuf,
    },

    /// Print the path of a cached implementation
    Find {
        /// Digest to look up
        digest: String,
    },

    /// List all cached digests
    List,

    /// Delete cached implementations
    Remove {
        /// Digests to remove
        #[arg(required = true)]
        digests: Vec<String>,
    },

    /// Re-check implementations against their digests
    Verify {
        /// Digests, or directories named after their digest (all entries if omitted)
        targets: Vec<String>,
    },

    /// Verify every cached implementation and report failures
    Audit,

    /// Hard-link identical files across cached implementations
    Optimise,

    /// Delete every cached implementation and leftover temporary directory
    Purge {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the manifest of a directory and its digest
    Manifest {
        /// Directory to describe
        directory: PathBuf,

        /// Manifest format: sha1, sha1new, sha256 or sha256new
        #[arg(default_value = "sha256new")]
        format: String,
    },

    /// Download implementations listed in a JSON file into the cache
    Fetch {
        /// JSON file holding a list of implementations
        file: PathBuf,

        /// Do not draw progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Run the shared store service
    Serve {
        /// Unix socket to listen on
        #[arg(long, default_value = "/run/zerostore/store.sock")]
        socket: PathBuf,

        /// Root directory of the shared cache
        #[arg(long, default_value = "/var/cache/0install.net/implementations")]
        root: PathBuf,

        /// Socket file permissions (octal)
        #[arg(long, default_value = "660")]
        socket_mode: String,

        /// Group allowed to remove and optimise entries (repeatable)
        #[arg(long = "admin-gid", value_name = "GID")]
        admin_gids: Vec<u32>,

        /// Refuse additions from ordinary users
        #[arg(long)]
        no_contributions: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
