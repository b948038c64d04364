// src/archive/tree.rs

//! Writing archive entries into a target directory
//!
//! Every format reader funnels its entries through [`TreeWriter`], which owns
//! the path mapping (sanitisation, sub-directory filter, destination prefix),
//! the executable-bit and symlink handling, and the deferred directory
//! timestamps.

use crate::error::{Error, Result};
use crate::filesystem::path::{archive_entry_path, strip_sub_dir, symlink_target_is_contained};
use crate::flags::{self, SYMLINK_FILE, XBIT_FILE};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

pub(crate) struct TreeWriter<'a> {
    root: &'a Path,
    sub_dir: Option<&'a Path>,
    destination: Option<&'a Path>,
    unix_fs: bool,
    dir_mtimes: Vec<(PathBuf, i64)>,
}

impl<'a> TreeWriter<'a> {
    pub(crate) fn new(
        root: &'a Path,
        sub_dir: Option<&'a Path>,
        destination: Option<&'a Path>,
        unix_fs: bool,
    ) -> Self {
        Self {
            root,
            sub_dir,
            destination,
            unix_fs,
            dir_mtimes: Vec::new(),
        }
    }

    /// Map a raw entry name to a path relative to the target root
    ///
    /// `None` means the entry falls outside the sub-directory filter (or is
    /// the archive root) and must be skipped.
    pub(crate) fn map_entry(&self, name: &str) -> Result<Option<PathBuf>> {
        let Some(path) = archive_entry_path(name)? else {
            return Ok(None);
        };

        let path = match self.sub_dir {
            Some(sub_dir) => match strip_sub_dir(&path, sub_dir) {
                Some(stripped) => stripped,
                None => return Ok(None),
            },
            None => path,
        };

        let path = match self.destination {
            Some(destination) if path.as_os_str().is_empty() => destination.to_path_buf(),
            Some(destination) => destination.join(path),
            None => path,
        };

        if path.as_os_str().is_empty() {
            Ok(None)
        } else {
            Ok(Some(path))
        }
    }

    /// Create a directory; its mtime is applied by [`TreeWriter::finish`]
    pub(crate) fn create_dir(&mut self, relative: &Path, mtime: Option<i64>) -> Result<()> {
        self.check_parents(relative)?;
        let path = self.root.join(relative);
        if fs::symlink_metadata(&path).is_ok_and(|m| !m.is_dir()) {
            fs::remove_file(&path)?;
        }
        fs::create_dir_all(&path)?;
        if let Some(mtime) = mtime {
            self.dir_mtimes.push((relative.to_path_buf(), mtime));
        }
        Ok(())
    }

    /// Stream one regular file out of the archive
    pub(crate) fn write_file<R: Read>(
        &mut self,
        relative: &Path,
        reader: &mut R,
        mtime: Option<i64>,
        executable: bool,
    ) -> Result<()> {
        let path = self.prepare_file(relative)?;

        let mut file = File::create(&path)?;
        copy_entry(reader, &mut file, relative)?;
        drop(file);

        if let Some(mtime) = mtime {
            filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0))?;
        }
        self.set_executable(relative, &path, executable)?;
        trace!("Extracted {}", relative.display());
        Ok(())
    }

    /// Create a symlink, or a flagged file holding the target where native
    /// symlinks are unavailable
    pub(crate) fn write_symlink(&mut self, relative: &Path, target: &str) -> Result<()> {
        if !symlink_target_is_contained(relative, target) {
            return Err(Error::ArchiveInvalid(format!(
                "Symlink {} points outside the archive: {}",
                relative.display(),
                target
            )));
        }

        let path = self.prepare_file(relative)?;
        if self.unix_fs {
            native_symlink(target, &path)?;
        } else {
            fs::write(&path, target.as_bytes())?;
            flags::remove(&self.root.join(XBIT_FILE), &flag_entry(relative))?;
            flags::add(&self.root.join(SYMLINK_FILE), &flag_entry(relative))?;
        }
        trace!("Linked {} -> {}", relative.display(), target);
        Ok(())
    }

    /// Materialise a hard link as a copy of an already extracted entry
    pub(crate) fn write_hard_link(&mut self, relative: &Path, target_name: &str) -> Result<()> {
        let target = self.map_entry(target_name)?.ok_or_else(|| {
            Error::ArchiveInvalid(format!(
                "Hard link {} refers to {} outside the extracted tree",
                relative.display(),
                target_name
            ))
        })?;
        self.check_parents(&target)?;
        let source = self.root.join(&target);
        let metadata = fs::symlink_metadata(&source).map_err(|_| {
            Error::ArchiveInvalid(format!(
                "Hard link {} refers to missing entry {}",
                relative.display(),
                target_name
            ))
        })?;
        if !metadata.is_file() {
            return Err(Error::ArchiveInvalid(format!(
                "Hard link {} does not refer to a regular file",
                relative.display()
            )));
        }

        let executable = self.is_executable(&target, &metadata)?;
        let path = self.prepare_file(relative)?;
        fs::copy(&source, &path)?;
        filetime::set_file_mtime(&path, FileTime::from_last_modification_time(&metadata))?;
        self.set_executable(relative, &path, executable)?;
        Ok(())
    }

    /// Apply deferred directory timestamps, innermost directories first
    pub(crate) fn finish(mut self) -> Result<()> {
        self.dir_mtimes
            .sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (relative, mtime) in &self.dir_mtimes {
            filetime::set_file_mtime(self.root.join(relative), FileTime::from_unix_time(*mtime, 0))?;
        }
        Ok(())
    }

    /// Reject writes through a symlink planted by an earlier entry
    fn check_parents(&self, relative: &Path) -> Result<()> {
        let mut current = self.root.to_path_buf();
        let Some(parent) = relative.parent() else {
            return Ok(());
        };
        for component in parent.components() {
            current.push(component);
            if fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
                return Err(Error::ArchiveInvalid(format!(
                    "Entry {} would be written through a symlink",
                    relative.display()
                )));
            }
        }
        Ok(())
    }

    /// Make room for a new file: parents exist, any previous file or symlink
    /// at the same path is gone
    fn prepare_file(&self, relative: &Path) -> Result<PathBuf> {
        self.check_parents(relative)?;
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => {
                return Err(Error::ArchiveInvalid(format!(
                    "File entry {} replaces a directory",
                    relative.display()
                )));
            }
            Ok(_) => {
                fs::remove_file(&path)?;
                if !self.unix_fs {
                    flags::remove(&self.root.join(SYMLINK_FILE), &flag_entry(relative))?;
                }
            }
            Err(_) => {}
        }
        Ok(path)
    }

    fn set_executable(&self, relative: &Path, path: &Path, executable: bool) -> Result<()> {
        if self.unix_fs {
            set_native_mode(path, executable)
        } else if executable {
            flags::add(&self.root.join(XBIT_FILE), &flag_entry(relative))
        } else {
            flags::remove(&self.root.join(XBIT_FILE), &flag_entry(relative))
        }
    }

    fn is_executable(&self, relative: &Path, metadata: &fs::Metadata) -> Result<bool> {
        if self.unix_fs {
            Ok(native_executable(metadata))
        } else {
            flags::contains(&self.root.join(XBIT_FILE), &flag_entry(relative))
        }
    }
}

fn flag_entry(relative: &Path) -> String {
    relative.to_string_lossy().replace('\\', "/")
}

/// Copy entry bytes, telling decoder failures apart from write failures
fn copy_entry<R: Read, W: Write>(reader: &mut R, writer: &mut W, relative: &Path) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::ArchiveInvalid(format!(
                    "Failed to read {} from archive: {}",
                    relative.display(),
                    e
                )));
            }
        };
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    Ok(total)
}

#[cfg(unix)]
fn native_symlink(target: &str, path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, path)?;
    Ok(())
}

#[cfg(not(unix))]
fn native_symlink(_target: &str, path: &Path) -> Result<()> {
    Err(Error::UnsupportedFormat(format!(
        "Native symlinks are unavailable for {}",
        path.display()
    )))
}

#[cfg(unix)]
fn set_native_mode(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_native_mode(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn native_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn native_executable(_metadata: &fs::Metadata) -> bool {
    false
}
