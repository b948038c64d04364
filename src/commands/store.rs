// src/commands/store.rs
//! Cache management commands (add, find, list, verify, purge, ...)

use super::ExitStatus;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::{debug, info, warn};
use zerostore::archive::{guess_mime_type, LocalArchive};
use zerostore::manifest::generate;
use zerostore::store::verify_directory;
use zerostore::{
    CancellationToken, CommitOutcome, Error, ImplementationStore, ManifestDigest, ManifestFormat,
    Result,
};

fn report_commit(digest: &ManifestDigest, outcome: CommitOutcome) -> ExitStatus {
    match outcome {
        CommitOutcome::Committed(path) => {
            println!("Added {} at {}", digest, path.display());
        }
        CommitOutcome::AlreadyPresent(path) => {
            warn!("{} is already in the cache", digest);
            println!("Already cached: {}", path.display());
        }
    }
    ExitStatus::Ok
}

/// Add an archive (optionally one sub-directory of it) or a directory
pub fn cmd_add(
    store: &dyn ImplementationStore,
    digest: &str,
    source: &Path,
    extract: Option<&str>,
    mime_type: Option<&str>,
) -> Result<ExitStatus> {
    let digest = ManifestDigest::from_id(digest)?;

    let outcome = if source.is_dir() {
        if extract.is_some() || mime_type.is_some() {
            return Err(Error::InvalidPath(format!(
                "{} is a directory; sub-directory and type only apply to archives",
                source.display()
            )));
        }
        info!("Adding directory {} as {}", source.display(), digest);
        store.add_directory(source, &digest)?
    } else {
        let mime_type = match mime_type {
            Some(mime_type) => mime_type.to_string(),
            None => {
                let name = source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                guess_mime_type(&name)
                    .ok_or_else(|| {
                        Error::UnsupportedFormat(format!(
                            "Cannot guess the archive type of {}; pass it explicitly",
                            source.display()
                        ))
                    })?
                    .to_string()
            }
        };
        info!("Adding archive {} ({}) as {}", source.display(), mime_type, digest);
        let archive =
            LocalArchive::new(source, mime_type).with_sub_dir(extract.map(str::to_string));
        store.add_archives(&[archive], &digest, &CancellationToken::new())?
    };

    Ok(report_commit(&digest, outcome))
}

/// Add a directory whose name is its own digest
pub fn cmd_copy(store: &dyn ImplementationStore, source: &Path) -> Result<ExitStatus> {
    let digest = source
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(ManifestDigest::from_dir_name)
        .ok_or_else(|| {
            Error::InvalidPath(format!(
                "{} is not named after a digest",
                source.display()
            ))
        })?;

    let outcome = store.add_directory(source, &digest)?;
    Ok(report_commit(&digest, outcome))
}

pub fn cmd_find(store: &dyn ImplementationStore, digest: &str) -> Result<ExitStatus> {
    let digest = ManifestDigest::from_id(digest)?;
    let path = store.get_path(&digest)?;
    println!("{}", path.display());
    Ok(ExitStatus::Ok)
}

pub fn cmd_list(store: &dyn ImplementationStore) -> Result<ExitStatus> {
    for digest in store.list_all()? {
        println!("{}", digest);
    }
    Ok(ExitStatus::Ok)
}

pub fn cmd_remove(store: &dyn ImplementationStore, digests: &[String]) -> Result<ExitStatus> {
    for digest in digests {
        let digest = ManifestDigest::from_id(digest)?;
        store.remove(&digest)?;
        println!("Removed {}", digest);
    }
    Ok(ExitStatus::Ok)
}

/// Verify the given digests or digest-named directories, or every entry
pub fn cmd_verify(store: &dyn ImplementationStore, targets: &[String]) -> Result<ExitStatus> {
    if targets.is_empty() {
        return cmd_audit(store);
    }

    let mut failed = 0usize;
    for target in targets {
        let path = Path::new(target);
        let result = if path.is_dir() {
            let digest = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(ManifestDigest::from_dir_name)
                .ok_or_else(|| {
                    Error::InvalidPath(format!("{} is not named after a digest", target))
                })?;
            verify_directory(path, &digest)
        } else {
            store.verify(&ManifestDigest::from_id(target)?)
        };

        match result {
            Ok(()) => println!("OK: {}", target),
            Err(e @ Error::DigestMismatch { .. }) => {
                failed += 1;
                print_mismatch(target, &e);
            }
            Err(e) => return Err(e),
        }
    }

    if failed > 0 {
        return Ok(ExitStatus::DigestMismatch);
    }
    Ok(ExitStatus::Ok)
}

fn print_mismatch(target: &str, error: &Error) {
    if let Error::DigestMismatch {
        expected,
        actual,
        actual_manifest,
        ..
    } = error
    {
        println!("FAILED: {}", target);
        println!("  expected: {}", expected);
        println!("  actual:   {}", actual);
        if let Some(manifest) = actual_manifest {
            debug!("Actual manifest of {}:\n{}", target, manifest);
        }
    }
}

/// Verify every entry, reporting failures without stopping
pub fn cmd_audit(store: &dyn ImplementationStore) -> Result<ExitStatus> {
    let digests = store.list_all()?;
    let mut mismatched = 0usize;
    let mut unreadable = 0usize;

    for digest in &digests {
        match store.verify(digest) {
            Ok(()) => debug!("{} is intact", digest),
            Err(e @ Error::DigestMismatch { .. }) => {
                mismatched += 1;
                print_mismatch(&digest.to_string(), &e);
            }
            Err(e) => {
                unreadable += 1;
                println!("ERROR: {}: {}", digest, e);
            }
        }
    }

    println!(
        "Checked {} implementation(s): {} corrupted, {} unreadable",
        digests.len(),
        mismatched,
        unreadable
    );
    if mismatched > 0 {
        Ok(ExitStatus::DigestMismatch)
    } else if unreadable > 0 {
        Ok(ExitStatus::IoError)
    } else {
        Ok(ExitStatus::Ok)
    }
}

pub fn cmd_optimise(store: &dyn ImplementationStore) -> Result<ExitStatus> {
    let saved = store.optimise()?;
    println!("Space freed up: {}", format_bytes(saved));
    Ok(ExitStatus::Ok)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["bytes", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} bytes", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Remove every entry and leftover temporary directory
pub fn cmd_purge(store: &dyn ImplementationStore, assume_yes: bool) -> Result<ExitStatus> {
    let digests = store.list_all()?;
    let temps = store.list_all_temp()?;

    if !assume_yes {
        print!(
            "Delete {} implementation(s) and {} temporary director(ies)? [y/N] ",
            digests.len(),
            temps.len()
        );
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(ExitStatus::Canceled);
        }
    }

    for digest in &digests {
        store.remove(digest)?;
    }
    for temp in &temps {
        zerostore::filesystem::remove_tree(temp)?;
    }
    println!(
        "Removed {} implementation(s) and {} temporary director(ies)",
        digests.len(),
        temps.len()
    );
    Ok(ExitStatus::Ok)
}

/// Print the manifest of `directory` followed by its digest
pub fn cmd_manifest(directory: &Path, format: &str) -> Result<ExitStatus> {
    let format: ManifestFormat = format.parse()?;
    if !format.is_supported() {
        return Err(Error::Misconfiguration(format!(
            "Cannot compute {} manifests",
            format
        )));
    }

    let manifest = generate(directory, format)?;
    print!("{}", manifest.to_text());
    println!("{}", manifest.calculate_digest()?);
    Ok(ExitStatus::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(1023), "1023 bytes");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
