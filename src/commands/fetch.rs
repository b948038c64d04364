// src/commands/fetch.rs
//! Download implementations listed in a JSON file

use super::ExitStatus;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use zerostore::fetch::DefaultTransport;
use zerostore::{
    CliProgress, Error, FetchStatus, Fetcher, ImplementationStore, Implementation, LogProgress,
    ProgressStyle, ProgressTracker, Result,
};

pub fn cmd_fetch(store: &dyn ImplementationStore, file: &Path, no_progress: bool) -> Result<ExitStatus> {
    let content = fs::read_to_string(file)?;
    let implementations: Vec<Implementation> = serde_json::from_str(&content)
        .map_err(|e| Error::ParseError(format!("{}: {}", file.display(), e)))?;
    info!("Fetching {} implementation(s) listed in {}", implementations.len(), file.display());

    let transport = DefaultTransport::new()?;
    let progress: Box<dyn ProgressTracker> = if no_progress {
        Box::new(LogProgress::new("Fetching", implementations.len() as u64))
    } else {
        Box::new(CliProgress::new(
            "Fetching",
            implementations.len() as u64,
            ProgressStyle::Bar,
        ))
    };

    let fetcher = Fetcher::new(store, &transport).with_progress(progress.as_ref());
    match fetcher.fetch_all(&implementations) {
        Ok(outcomes) => {
            progress.finish_with_message("Done");
            for outcome in outcomes {
                for problem in &outcome.problems {
                    warn!("{}: {}", outcome.digest, problem);
                }
                match outcome.status {
                    FetchStatus::Committed => {
                        println!("Fetched {} into {}", outcome.digest, outcome.path.display())
                    }
                    FetchStatus::AlreadyPresent => {
                        println!("Already cached: {}", outcome.digest)
                    }
                }
            }
            Ok(ExitStatus::Ok)
        }
        Err(Error::FetchFailed(failures)) => {
            progress.finish_with_error("Some implementations could not be fetched");
            for failure in &failures {
                eprintln!("Failed to fetch {}", failure);
            }
            Ok(ExitStatus::IoError)
        }
        Err(e) => {
            progress.finish_with_error(&e.to_string());
            Err(e)
        }
    }
}
