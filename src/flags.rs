// src/flags.rs

//! Flag files that stand in for Unix file attributes
//!
//! On filesystems without native permission bits the executable bit and
//! symlinks are recorded in sidecar files at the root of an implementation:
//!
//! - `.xbit` lists files that must be treated as executable
//! - `.symlink` lists regular files whose content is a symlink target
//!
//! One entry per line, relative to the implementation root, with a leading
//! slash and POSIX separators (`/bin/run`).

use crate::error::Result;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Name of the executable-bit flag file
pub const XBIT_FILE: &str = ".xbit";

/// Name of the symlink flag file
pub const SYMLINK_FILE: &str = ".symlink";

/// Normalise a relative path into flag-file form (`/a/b`)
pub fn normalize_entry(relative: &str) -> String {
    let unified = relative.replace('\\', "/");
    let trimmed = unified.trim_matches('/');
    format!("/{}", trimmed)
}

/// Read all entries of a flag file; a missing file has no entries
pub fn read(flag_file: &Path) -> Result<BTreeSet<String>> {
    let content = match fs::read_to_string(flag_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(normalize_entry)
        .collect())
}

/// Check whether `relative` is listed in the flag file
pub fn contains(flag_file: &Path, relative: &str) -> Result<bool> {
    Ok(read(flag_file)?.contains(&normalize_entry(relative)))
}

/// Append an entry to a flag file, creating it if needed
pub fn add(flag_file: &Path, relative: &str) -> Result<()> {
    let entry = normalize_entry(relative);
    if read(flag_file)?.contains(&entry) {
        return Ok(());
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(flag_file)?;
    writeln!(file, "{}", entry)?;
    debug!("Flagged {} in {}", entry, flag_file.display());
    Ok(())
}

/// Remove an entry and everything below it from a flag file
///
/// The file is rewritten through a temporary file and a rename. A flag file
/// left with no entries is deleted.
pub fn remove(flag_file: &Path, relative: &str) -> Result<()> {
    let entries = read(flag_file)?;
    if entries.is_empty() {
        return Ok(());
    }

    let entry = normalize_entry(relative);
    let child_prefix = format!("{}/", entry);
    let remaining: Vec<&String> = entries
        .iter()
        .filter(|e| **e != entry && !e.starts_with(&child_prefix))
        .collect();

    if remaining.len() == entries.len() {
        return Ok(());
    }

    if remaining.is_empty() {
        fs::remove_file(flag_file)?;
    } else {
        let mut content = String::new();
        for e in remaining {
            content.push_str(e);
            content.push('\n');
        }
        let temp_path = flag_file.with_extension("new");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, flag_file)?;
    }

    debug!("Unflagged {} in {}", entry, flag_file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_entry() {
        assert_eq!(normalize_entry("bin/run"), "/bin/run");
        assert_eq!(normalize_entry("/bin/run"), "/bin/run");
        assert_eq!(normalize_entry("bin\\run"), "/bin/run");
        assert_eq!(normalize_entry("dir/"), "/dir");
    }

    #[test]
    fn test_missing_flag_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let entries = read(&temp_dir.path().join(XBIT_FILE)).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_add_and_contains() {
        let temp_dir = TempDir::new().unwrap();
        let flag_file = temp_dir.path().join(XBIT_FILE);

        add(&flag_file, "bin/run").unwrap();
        add(&flag_file, "bin/run").unwrap();
        add(&flag_file, "lib/helper").unwrap();

        assert!(contains(&flag_file, "bin/run").unwrap());
        assert!(contains(&flag_file, "/lib/helper").unwrap());
        assert!(!contains(&flag_file, "bin").unwrap());

        let raw = fs::read_to_string(&flag_file).unwrap();
        assert_eq!(raw, "/bin/run\n/lib/helper\n");
    }

    #[test]
    fn test_remove_entry_and_children() {
        let temp_dir = TempDir::new().unwrap();
        let flag_file = temp_dir.path().join(XBIT_FILE);

        add(&flag_file, "dir/a").unwrap();
        add(&flag_file, "dir/sub/b").unwrap();
        add(&flag_file, "dirty").unwrap();

        remove(&flag_file, "dir").unwrap();

        let entries = read(&flag_file).unwrap();
        assert_eq!(entries.into_iter().collect::<Vec<_>>(), vec!["/dirty".to_string()]);
    }

    #[test]
    fn test_remove_last_entry_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let flag_file = temp_dir.path().join(SYMLINK_FILE);

        add(&flag_file, "link").unwrap();
        remove(&flag_file, "link").unwrap();

        assert!(!flag_file.exists());
    }
}
