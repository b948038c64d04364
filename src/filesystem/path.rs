// src/filesystem/path.rs

//! Path sanitization utilities for security
//!
//! Archive entry names and symlink targets come from untrusted downloads.
//! Everything here operates lexically, before any filesystem write, so a
//! hostile archive cannot place a file outside its extraction root.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Turn an archive entry name into a path relative to the extraction root
///
/// Backslashes are treated as separators, `.` components and redundant
/// slashes are dropped. Absolute names and names containing `..` are
/// rejected as [`Error::ArchiveInvalid`]. The archive root itself (`./`)
/// yields `None`.
///
/// # Examples
///
/// ```
/// use zerostore::filesystem::path::archive_entry_path;
/// use std::path::PathBuf;
///
/// assert_eq!(
///     archive_entry_path("./pkg/bin/run").unwrap(),
///     Some(PathBuf::from("pkg/bin/run"))
/// );
/// assert_eq!(archive_entry_path("./").unwrap(), None);
/// assert!(archive_entry_path("../etc/passwd").is_err());
/// assert!(archive_entry_path("/etc/passwd").is_err());
/// ```
pub fn archive_entry_path(name: &str) -> Result<Option<PathBuf>> {
    let unified = name.replace('\\', "/");

    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(Error::ArchiveInvalid(format!(
            "Archive entry has an absolute path: {}",
            name
        )));
    }

    let mut normalized = PathBuf::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(Error::ArchiveInvalid(format!(
                    "Archive entry escapes the extraction root: {}",
                    name
                )));
            }
            _ => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(normalized))
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Strip a sub-directory filter from an entry path
///
/// Returns `None` for entries outside `sub_dir`; the sub-directory itself
/// maps to an empty path.
pub fn strip_sub_dir(path: &Path, sub_dir: &Path) -> Option<PathBuf> {
    path.strip_prefix(sub_dir).ok().map(Path::to_path_buf)
}

/// Check that a symlink at `link` (relative to the tree root) pointing to
/// `target` stays inside the tree
pub fn symlink_target_is_contained(link: &Path, target: &str) -> bool {
    let unified = target.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return false;
    }

    let mut depth = link
        .parent()
        .map(|parent| parent.components().count())
        .unwrap_or(0);
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            _ => depth += 1,
        }
    }
    true
}

/// Check a single path component such as a cache directory name
pub fn sanitize_filename(name: &str) -> Result<String> {
    if name.contains('/') || name.contains('\\') {
        return Err(Error::PathTraversal(format!(
            "Filename contains path separator: {}",
            name
        )));
    }

    if name == ".." || name == "." {
        return Err(Error::PathTraversal(format!("Invalid filename: {}", name)));
    }

    if name.is_empty() {
        return Err(Error::InvalidPath("Empty filename".to_string()));
    }

    Ok(name.to_string())
}
