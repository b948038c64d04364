// src/manifest/generator.rs

//! Walks a directory tree and builds its manifest
//!
//! Entries are visited per directory with files (and symlinks) first, then
//! sub-directories, each group in byte order of the name; every directory is
//! followed immediately by its own contents. Symlinks are never followed.

use super::{Manifest, ManifestFormat, ManifestNode, MANIFEST_FILE};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::filesystem;
use crate::flags::{self, SYMLINK_FILE, XBIT_FILE};
use filetime::FileTime;
use std::cmp::Ordering;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Manifest generator for one directory tree
pub struct ManifestGenerator {
    root: PathBuf,
    format: ManifestFormat,
    cancel: CancellationToken,
}

impl ManifestGenerator {
    pub fn new(root: impl Into<PathBuf>, format: ManifestFormat) -> Self {
        Self {
            root: root.into(),
            format,
            cancel: CancellationToken::new(),
        }
    }

    /// Check this token between entries
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Walk the tree and build the manifest
    pub fn generate(&self) -> Result<Manifest> {
        if !self.format.is_supported() {
            return Err(Error::Misconfiguration(format!(
                "Cannot compute {} manifests",
                self.format
            )));
        }
        if !self.root.is_dir() {
            return Err(Error::InvalidPath(format!(
                "Not a directory: {}",
                self.root.display()
            )));
        }

        let xbits = flags::read(&self.root.join(XBIT_FILE))?;
        let symlinks = flags::read(&self.root.join(SYMLINK_FILE))?;

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by(compare_entries)
            .into_iter()
            .filter_entry(|entry| !(entry.depth() == 1 && is_reserved_name(entry)));

        let mut nodes = Vec::new();
        for entry in walker {
            self.cancel.check()?;
            let entry = entry.map_err(|e| {
                Error::IoError(format!("Failed to walk {}: {}", self.root.display(), e))
            })?;

            let relative = relative_path(&self.root, entry.path())?;
            let name = entry_name(&entry)?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                nodes.push(ManifestNode::Directory { path: relative });
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry.path())?;
                let bytes = target.as_os_str().as_encoded_bytes();
                nodes.push(ManifestNode::Symlink {
                    hash: self.format.digest_content(bytes)?,
                    size: bytes.len() as u64,
                    name,
                });
            } else if !file_type.is_file() {
                return Err(filesystem::not_regular(entry.path()));
            } else if symlinks.contains(&relative) {
                let (mut file, _) = filesystem::open_regular(entry.path())?;
                let mut target = Vec::new();
                file.read_to_end(&mut target)?;
                nodes.push(ManifestNode::Symlink {
                    hash: self.format.digest_content(target.as_slice())?,
                    size: target.len() as u64,
                    name,
                });
            } else {
                let (file, metadata) = filesystem::open_regular(entry.path())?;
                let hash = self.format.digest_content(file)?;
                nodes.push(ManifestNode::File {
                    hash,
                    mtime: FileTime::from_last_modification_time(&metadata).unix_seconds(),
                    size: metadata.len(),
                    name,
                    executable: is_native_executable(&metadata) || xbits.contains(&relative),
                });
            }
        }

        debug!(
            "Generated {} manifest for {} ({} entries)",
            self.format,
            self.root.display(),
            nodes.len()
        );
        Ok(Manifest::new(self.format, nodes))
    }
}

/// Build the manifest of `root` in `format`
pub fn generate(root: &Path, format: ManifestFormat) -> Result<Manifest> {
    ManifestGenerator::new(root, format).generate()
}

fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| {
            a.file_name()
                .as_encoded_bytes()
                .cmp(b.file_name().as_encoded_bytes())
        })
}

fn is_reserved_name(entry: &DirEntry) -> bool {
    let name = entry.file_name();
    name == MANIFEST_FILE || name == XBIT_FILE || name == SYMLINK_FILE
}

fn entry_name(entry: &DirEntry) -> Result<String> {
    let name = entry.file_name().to_str().ok_or_else(|| {
        Error::InvalidPath(format!("Non UTF-8 file name: {}", entry.path().display()))
    })?;
    if name.contains('\n') {
        return Err(Error::InvalidPath(format!(
            "File name contains a newline: {:?}",
            name
        )));
    }
    Ok(name.to_string())
}

/// Path of `path` below `root` in flag-file form (`/a/b`)
fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidPath(format!("{} is outside {}", path.display(), root.display())))?;

    let mut out = String::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            Error::InvalidPath(format!("Non UTF-8 path: {}", path.display()))
        })?;
        out.push('/');
        out.push_str(part);
    }
    Ok(out)
}

#[cfg(unix)]
fn is_native_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_native_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    fn sha256_hex(data: &[u8]) -> String {
        crate::hash::sha256_hex(data)
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = generate(temp_dir.path(), ManifestFormat::Sha256New).unwrap();
        assert!(manifest.nodes().is_empty());
        assert_eq!(
            manifest.calculate_digest().unwrap(),
            "sha256new_4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ"
        );
    }

    #[test]
    fn test_files_before_directories_in_byte_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("b_dir/inner")).unwrap();
        fs::create_dir(root.join("a_dir")).unwrap();
        fs::write(root.join("Z"), b"z").unwrap();
        fs::write(root.join("a"), b"a").unwrap();
        fs::write(root.join("b_dir/file"), b"123").unwrap();
        for path in ["Z", "a", "b_dir/file"] {
            set_mtime(&root.join(path), 946684800);
        }

        let manifest = generate(root, ManifestFormat::Sha256).unwrap();
        let expected = format!(
            "F {} 946684800 1 Z\nF {} 946684800 1 a\nD /a_dir\nD /b_dir\nF {} 946684800 3 file\nD /b_dir/inner\n",
            sha256_hex(b"z"),
            sha256_hex(b"a"),
            sha256_hex(b"123"),
        );
        assert_eq!(manifest.to_text(), expected);
    }

    #[test]
    fn test_reserved_files_are_skipped_only_at_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join(MANIFEST_FILE), b"junk").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join(MANIFEST_FILE), b"kept").unwrap();
        set_mtime(&root.join("sub").join(MANIFEST_FILE), 0);

        let manifest = generate(root, ManifestFormat::Sha256).unwrap();
        assert_eq!(
            manifest.to_text(),
            format!("D /sub\nF {} 0 4 .manifest\n", sha256_hex(b"kept"))
        );
    }

    #[test]
    fn test_xbit_and_symlink_flags() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("run"), b"#!/bin/sh\n").unwrap();
        fs::write(root.join("link"), b"run").unwrap();
        set_mtime(&root.join("run"), 100);
        flags::add(&root.join(XBIT_FILE), "run").unwrap();
        flags::add(&root.join(SYMLINK_FILE), "link").unwrap();

        let manifest = generate(root, ManifestFormat::Sha256).unwrap();
        assert_eq!(
            manifest.to_text(),
            format!(
                "S {} 3 link\nX {} 100 10 run\n",
                sha256_hex(b"run"),
                sha256_hex(b"#!/bin/sh\n")
            )
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_native_symlink_and_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("target_dir")).unwrap();
        fs::write(root.join("tool"), b"bin").unwrap();
        fs::set_permissions(root.join("tool"), fs::Permissions::from_mode(0o755)).unwrap();
        set_mtime(&root.join("tool"), 5);
        std::os::unix::fs::symlink("target_dir", root.join("dir_link")).unwrap();

        let manifest = generate(root, ManifestFormat::Sha256).unwrap();
        assert_eq!(
            manifest.to_text(),
            format!(
                "S {} 10 dir_link\nX {} 5 3 tool\nD /target_dir\n",
                sha256_hex(b"target_dir"),
                sha256_hex(b"bin")
            )
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_fifo_is_refused_without_blocking() {
        use nix::sys::stat::Mode;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a"), b"a").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        nix::unistd::mkfifo(&root.join("sub/pipe"), Mode::S_IRUSR | Mode::S_IWUSR).unwrap();

        let result = generate(root, ManifestFormat::Sha256New);
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_sha1_is_a_misconfiguration() {
        let temp_dir = TempDir::new().unwrap();
        let result = generate(temp_dir.path(), ManifestFormat::Sha1New);
        assert!(matches!(result, Err(Error::Misconfiguration(_))));
    }

    #[test]
    fn test_cancellation() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("file"), b"x").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = ManifestGenerator::new(temp_dir.path(), ManifestFormat::Sha256)
            .with_cancel(token)
            .generate();
        assert!(matches!(result, Err(Error::Canceled)));
    }
}
