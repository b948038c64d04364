// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use zerostore::cancel::CancellationToken;
use zerostore::fetch::Transport;
use zerostore::manifest::generate;
use zerostore::progress::ProgressTracker;
use zerostore::{Error, ManifestDigest, ManifestFormat, Result};

/// Timestamp given to every file in test archives and trees (2000-01-01 UTC)
pub const MTIME: i64 = 946684800;

/// One file of a test tree: relative path, content, executable
pub type FileSpec<'a> = (&'a str, &'a [u8], bool);

/// Write files below `root` with the shared timestamp.
pub fn write_tree(root: &Path, files: &[FileSpec<'_>]) {
    for (name, data, executable) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = if *executable { 0o755 } else { 0o644 };
            fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        }
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(MTIME, 0)).unwrap();
    }
}

/// sha256new digest of an existing directory.
pub fn digest_of(dir: &Path) -> ManifestDigest {
    let id = generate(dir, ManifestFormat::Sha256New)
        .unwrap()
        .calculate_digest()
        .unwrap();
    ManifestDigest::from_id(&id).unwrap()
}

/// sha256new digest of the tree `files` would produce.
pub fn expected_digest(files: &[FileSpec<'_>]) -> ManifestDigest {
    let temp_dir = tempfile::tempdir().unwrap();
    write_tree(temp_dir.path(), files);
    digest_of(temp_dir.path())
}

/// Uncompressed tar holding `files`.
pub fn tar_archive(files: &[FileSpec<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data, executable) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(if *executable { 0o755 } else { 0o644 });
        header.set_mtime(MTIME as u64);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Gzip-compressed tar holding `files`.
pub fn tar_gz_archive(files: &[FileSpec<'_>]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_archive(files)).unwrap();
    encoder.finish().unwrap()
}

/// Deflated zip holding `files`.
pub fn zip_archive(files: &[FileSpec<'_>]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let time = zip::DateTime::from_date_and_time(2000, 1, 1, 0, 0, 0).unwrap();
    for (name, data, executable) in files {
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(time)
            .unix_permissions(if *executable { 0o755 } else { 0o644 });
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Transport serving canned responses by href and recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, href: &str, data: Vec<u8>) -> Self {
        self.responses.insert(href.to_string(), data);
        self
    }

    /// Hrefs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn download(
        &self,
        href: &str,
        dest: &mut dyn Write,
        progress: &dyn ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        cancel.check()?;
        self.requests.lock().unwrap().push(href.to_string());
        let data = self
            .responses
            .get(href)
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 Not Found from {}", href)))?;
        dest.write_all(data)?;
        progress.set_position(data.len() as u64);
        Ok(data.len() as u64)
    }
}

/// Names of all directories directly below `root`.
pub fn dir_entries(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Unprotected directory store below `root`, so temp dirs clean up easily.
pub fn store_in(root: &Path) -> zerostore::DirectoryStore {
    zerostore::DirectoryStore::new(root)
        .unwrap()
        .with_write_protection(false)
}
