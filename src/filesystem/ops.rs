// src/filesystem/ops.rs

//! Tree-level filesystem operations used by the stores
//!
//! Copying trees into staging directories, write-protecting committed
//! entries and replacing duplicate files with hard links.

use crate::error::{Error, Result};
use crate::flags::{self, SYMLINK_FILE};
use filetime::FileTime;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Whether files under `dir` carry native Unix permissions and symlinks
///
/// On other platforms the `.xbit` and `.symlink` flag files stand in for
/// them.
pub fn has_native_permissions(_dir: &Path) -> bool {
    cfg!(unix)
}

/// Recursively copy `src` into the existing directory `dst`
///
/// Modification times and permission bits of regular files are preserved
/// and symlinks are copied as symlinks (or flagged files where native
/// symlinks are unavailable). Flag files are copied like any other file.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(Error::NotFound(format!("Directory not found: {}", src.display())));
    }

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry
            .map_err(|e| Error::IoError(format!("Failed to walk {}: {}", src.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())?;
            create_symlink(&link_target, &target, dst, relative)?;
        } else if file_type.is_file() {
            let (mut file, metadata) = open_regular(entry.path())?;
            let mut out = File::create(&target)?;
            io::copy(&mut file, &mut out)?;
            fs::set_permissions(&target, metadata.permissions())?;
            filetime::set_file_mtime(&target, FileTime::from_last_modification_time(&metadata))?;
        } else {
            return Err(not_regular(entry.path()));
        }
    }

    debug!("Copied {} to {}", src.display(), dst.display());
    Ok(())
}

/// Open `path` for reading, refusing anything but a regular file
///
/// Symlinks are not followed and opening a FIFO does not block; the type is
/// checked on the open descriptor, so a file swapped in after a directory
/// scan is caught too.
pub fn open_regular(path: &Path) -> Result<(File, fs::Metadata)> {
    let mut options = fs::OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK | libc::O_NOFOLLOW);
    }

    let file = options.open(path)?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(not_regular(path));
    }
    Ok((file, metadata))
}

/// Error for FIFOs, sockets and device nodes found in a tree
pub fn not_regular(path: &Path) -> Error {
    Error::UnsupportedFormat(format!(
        "Not a regular file, directory or symlink: {}",
        path.display()
    ))
}

#[cfg(unix)]
fn create_symlink(link_target: &Path, path: &Path, _root: &Path, _relative: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link_target, path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(link_target: &Path, path: &Path, root: &Path, relative: &Path) -> Result<()> {
    fs::write(path, link_target.to_string_lossy().as_bytes())?;
    flags::add(&root.join(SYMLINK_FILE), &relative.to_string_lossy())
}

/// Turn `.xbit` and `.symlink` entries into native executable bits and
/// symlinks, then delete the flag files
///
/// Does nothing where native permissions are unavailable.
pub fn apply_flags_natively(root: &Path) -> Result<()> {
    if !has_native_permissions(root) {
        return Ok(());
    }
    apply_flags(root)
}

#[cfg(unix)]
fn apply_flags(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let xbit_file = root.join(flags::XBIT_FILE);
    for entry in flags::read(&xbit_file)? {
        let path = root.join(entry.trim_start_matches('/'));
        let metadata = fs::symlink_metadata(&path)?;
        if metadata.is_file() {
            let mode = metadata.permissions().mode();
            fs::set_permissions(&path, fs::Permissions::from_mode(mode | 0o111))?;
        }
    }

    let symlink_file = root.join(SYMLINK_FILE);
    for entry in flags::read(&symlink_file)? {
        let relative = entry.trim_start_matches('/');
        let path = root.join(relative);
        let target = fs::read_to_string(&path)?;
        if !super::path::symlink_target_is_contained(Path::new(relative), &target) {
            return Err(Error::PathTraversal(format!(
                "Flagged symlink {} points outside the tree: {}",
                entry, target
            )));
        }
        fs::remove_file(&path)?;
        std::os::unix::fs::symlink(&target, &path)?;
    }

    for flag_file in [xbit_file, symlink_file] {
        if flag_file.exists() {
            fs::remove_file(&flag_file)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_flags(_root: &Path) -> Result<()> {
    Ok(())
}

/// Strip (or restore) write permission on every file and directory of a
/// tree; symlinks are left alone
pub fn set_write_protection(root: &Path, protect: bool) -> Result<()> {
    // Children before parents when protecting, parents first when lifting
    let walker = WalkDir::new(root)
        .follow_links(false)
        .contents_first(protect);

    for entry in walker {
        let entry = entry
            .map_err(|e| Error::IoError(format!("Failed to walk {}: {}", root.display(), e)))?;
        if entry.file_type().is_symlink() {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| {
            Error::IoError(format!("Failed to stat {}: {}", entry.path().display(), e))
        })?;
        let mut permissions = metadata.permissions();
        set_writable(&mut permissions, !protect);
        fs::set_permissions(entry.path(), permissions)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_writable(permissions: &mut fs::Permissions, writable: bool) {
    use std::os::unix::fs::PermissionsExt;

    let mode = permissions.mode();
    let mode = if writable { mode | 0o200 } else { mode & !0o222 };
    permissions.set_mode(mode);
}

#[cfg(not(unix))]
fn set_writable(permissions: &mut fs::Permissions, writable: bool) {
    permissions.set_readonly(!writable);
}

/// Delete a tree, making its directories writable first
///
/// Unlinking only needs write permission on the parent directory, so file
/// modes are never touched.
pub fn remove_tree(path: &Path) -> Result<()> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mut permissions = metadata.permissions();
        set_writable(&mut permissions, true);
        // Best effort: whatever stays protected makes remove_dir_all report it
        if let Err(e) = fs::set_permissions(entry.path(), permissions) {
            debug!("Could not make {} writable: {}", entry.path().display(), e);
        }
    }
    fs::remove_dir_all(path)?;
    Ok(())
}

/// Replace `duplicate` with a hard link to `original`
///
/// The link is created under a temporary name next to `duplicate` and then
/// renamed over it, so `duplicate` never disappears.
pub fn replace_with_hardlink(original: &Path, duplicate: &Path) -> Result<()> {
    let file_name = duplicate
        .file_name()
        .ok_or_else(|| Error::InvalidPath(duplicate.display().to_string()))?;
    let temp_path = duplicate.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));

    fs::hard_link(original, &temp_path)?;
    if let Err(e) = fs::rename(&temp_path, duplicate) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Whether two paths are already the same file
#[cfg(unix)]
pub fn same_file(a: &Path, b: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let a = fs::metadata(a)?;
    let b = fs::metadata(b)?;
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
pub fn same_file(_a: &Path, _b: &Path) -> Result<bool> {
    Ok(false)
}
