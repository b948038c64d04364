// src/archive/mod.rs

//! Archive extraction into implementation trees
//!
//! Formats form a closed set ([`ArchiveFormat`]) dispatched by a single
//! [`Extractor`]. Every entry goes through the same pipeline:
//!
//! 1. Sanitise the entry name; absolute paths and `..` are rejected
//! 2. Apply the sub-directory filter and the destination prefix
//! 3. Write directories, files, symlinks and hard-link copies
//! 4. Record the executable bit natively or in `.xbit`
//! 5. Apply directory timestamps once all entries are written
//!
//! A failed extraction leaves a partial tree behind; callers extract into a
//! staging directory and discard it on error.

mod compression;
mod tarball;
mod tree;
mod zipfile;

pub use compression::{CompressionError, CompressionFormat};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::filesystem::path::archive_entry_path;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use tree::TreeWriter;

/// Supported archive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGzip,
    TarBzip2,
    TarLzma,
    TarXz,
    TarZstd,
    RubyGem,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 8] = [
        Self::Zip,
        Self::Tar,
        Self::TarGzip,
        Self::TarBzip2,
        Self::TarLzma,
        Self::TarXz,
        Self::TarZstd,
        Self::RubyGem,
    ];

    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::Tar => "application/x-tar",
            Self::TarGzip => "application/x-compressed-tar",
            Self::TarBzip2 => "application/x-bzip-compressed-tar",
            Self::TarLzma => "application/x-lzma-compressed-tar",
            Self::TarXz => "application/x-xz-compressed-tar",
            Self::TarZstd => "application/x-zstd-compressed-tar",
            Self::RubyGem => "application/x-ruby-gem",
        }
    }

    /// Look up a format by MIME type
    pub fn from_mime_type(mime_type: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.mime_type().eq_ignore_ascii_case(mime_type.trim()))
            .ok_or_else(|| Error::UnsupportedFormat(format!("Unsupported archive type: {}", mime_type)))
    }

    /// Compression wrapped around the tar stream
    fn compression(&self) -> CompressionFormat {
        match self {
            Self::TarGzip => CompressionFormat::Gzip,
            Self::TarBzip2 => CompressionFormat::Bzip2,
            Self::TarLzma => CompressionFormat::Lzma,
            Self::TarXz => CompressionFormat::Xz,
            Self::TarZstd => CompressionFormat::Zstd,
            Self::Zip | Self::Tar | Self::RubyGem => CompressionFormat::None,
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_mime_type(s)
    }
}

/// Guess an archive's MIME type from its file name
///
/// # Examples
///
/// ```
/// use zerostore::archive::guess_mime_type;
///
/// assert_eq!(guess_mime_type("tool-1.0.tar.gz"), Some("application/x-compressed-tar"));
/// assert_eq!(guess_mime_type("TOOL.ZIP"), Some("application/zip"));
/// assert_eq!(guess_mime_type("notes.txt"), None);
/// ```
pub fn guess_mime_type(file_name: &str) -> Option<&'static str> {
    const EXTENSIONS: &[(&str, ArchiveFormat)] = &[
        (".zip", ArchiveFormat::Zip),
        (".tar", ArchiveFormat::Tar),
        (".tar.gz", ArchiveFormat::TarGzip),
        (".tgz", ArchiveFormat::TarGzip),
        (".tar.bz2", ArchiveFormat::TarBzip2),
        (".tbz2", ArchiveFormat::TarBzip2),
        (".tbz", ArchiveFormat::TarBzip2),
        (".tar.lzma", ArchiveFormat::TarLzma),
        (".tlz", ArchiveFormat::TarLzma),
        (".tar.xz", ArchiveFormat::TarXz),
        (".txz", ArchiveFormat::TarXz),
        (".tar.zst", ArchiveFormat::TarZstd),
        (".gem", ArchiveFormat::RubyGem),
    ];

    let lower = file_name.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(extension, _)| lower.ends_with(extension))
        .map(|(_, format)| format.mime_type())
}

/// Extracts one archive into a target directory
#[derive(Debug, Clone)]
pub struct Extractor {
    format: ArchiveFormat,
    sub_dir: Option<PathBuf>,
    destination: Option<PathBuf>,
    start_offset: u64,
    unix_fs: bool,
    cancel: CancellationToken,
}

impl Extractor {
    pub fn new(format: ArchiveFormat) -> Self {
        Self {
            format,
            sub_dir: None,
            destination: None,
            start_offset: 0,
            unix_fs: cfg!(unix),
            cancel: CancellationToken::new(),
        }
    }

    /// Create an extractor for a MIME type
    pub fn for_mime_type(mime_type: &str) -> Result<Self> {
        Ok(Self::new(ArchiveFormat::from_mime_type(mime_type)?))
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Only extract entries below `sub_dir`, relative to it
    pub fn with_sub_dir(mut self, sub_dir: &str) -> Result<Self> {
        self.sub_dir = archive_entry_path(sub_dir)?;
        Ok(self)
    }

    /// Place the extracted tree below `destination` inside the target
    pub fn with_destination(mut self, destination: &str) -> Result<Self> {
        self.destination = archive_entry_path(destination)?;
        Ok(self)
    }

    /// Skip this many leading bytes (e.g. a self-extracting stub)
    pub fn with_start_offset(mut self, start_offset: u64) -> Self {
        self.start_offset = start_offset;
        self
    }

    /// Whether the target filesystem takes native executable bits and
    /// symlinks; otherwise `.xbit` and `.symlink` flag files are written
    pub fn with_unix_fs(mut self, unix_fs: bool) -> Self {
        self.unix_fs = unix_fs;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Extract an archive file into `target`
    pub fn extract_file(&self, archive: &Path, target: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| {
            Error::IoError(format!("Failed to open archive {}: {}", archive.display(), e))
        })?;
        debug!(
            "Extracting {} ({}) into {}",
            archive.display(),
            self.format,
            target.display()
        );
        self.extract(BufReader::new(file), target)
    }

    /// Extract an archive stream into `target`, which is created if needed
    pub fn extract<R: Read + Seek>(&self, reader: R, target: &Path) -> Result<()> {
        std::fs::create_dir_all(target)?;
        let reader = SkipReader::new(reader, self.start_offset)?;
        let mut writer = TreeWriter::new(
            target,
            self.sub_dir.as_deref(),
            self.destination.as_deref(),
            self.unix_fs,
        );

        match self.format {
            ArchiveFormat::Zip => zipfile::extract_zip(reader, &mut writer, &self.cancel)?,
            ArchiveFormat::RubyGem => tarball::extract_gem(reader, &mut writer, &self.cancel)?,
            format => {
                let decoder = compression::create_decoder(reader, format.compression())?;
                tarball::extract_tar(decoder, &mut writer, &self.cancel)?;
            }
        }

        writer.finish()
    }
}

/// An archive file on disk together with how to extract it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchive {
    pub path: PathBuf,
    pub mime_type: String,
    pub sub_dir: Option<String>,
    pub destination: Option<String>,
    pub start_offset: u64,
}

impl LocalArchive {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            sub_dir: None,
            destination: None,
            start_offset: 0,
        }
    }

    pub fn with_sub_dir(mut self, sub_dir: Option<String>) -> Self {
        self.sub_dir = sub_dir;
        self
    }

    pub fn with_destination(mut self, destination: Option<String>) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_start_offset(mut self, start_offset: u64) -> Self {
        self.start_offset = start_offset;
        self
    }

    /// Build the extractor for this archive
    pub fn extractor(&self) -> Result<Extractor> {
        let mut extractor =
            Extractor::for_mime_type(&self.mime_type)?.with_start_offset(self.start_offset);
        if let Some(sub_dir) = &self.sub_dir {
            extractor = extractor.with_sub_dir(sub_dir)?;
        }
        if let Some(destination) = &self.destination {
            extractor = extractor.with_destination(destination)?;
        }
        Ok(extractor)
    }

    /// Extract into `target`, honouring `cancel` between entries
    pub fn extract_into(&self, target: &Path, cancel: &CancellationToken) -> Result<()> {
        self.extractor()?
            .with_cancel(cancel.clone())
            .extract_file(&self.path, target)
    }
}

/// A view of a stream that starts `offset` bytes in
struct SkipReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read + Seek> SkipReader<R> {
    fn new(mut inner: R, offset: u64) -> Result<Self> {
        let length = inner.seek(SeekFrom::End(0))?;
        if offset > length {
            return Err(Error::ArchiveInvalid(format!(
                "Start offset {} lies beyond the end of the archive ({} bytes)",
                offset, length
            )));
        }
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self { inner, offset })
    }
}

impl<R: Read> Read for SkipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for SkipReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            SeekFrom::Start(n) => SeekFrom::Start(n + self.offset),
            other => other,
        };
        let absolute = self.inner.seek(pos)?;
        absolute.checked_sub(self.offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of archive")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags;
    use std::fs;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn tar_bytes(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_mtime(946684800);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, mode) in entries {
            let options = zip::write::FileOptions::default().unix_permissions(*mode);
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_mime_types() {
        for format in ArchiveFormat::ALL {
            assert_eq!(ArchiveFormat::from_mime_type(format.mime_type()).unwrap(), format);
        }
        assert!(matches!(
            ArchiveFormat::from_mime_type("application/x-rar"),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("a.tar.bz2"), Some("application/x-bzip-compressed-tar"));
        assert_eq!(guess_mime_type("a.tgz"), Some("application/x-compressed-tar"));
        assert_eq!(guess_mime_type("a.tar.xz"), Some("application/x-xz-compressed-tar"));
        assert_eq!(guess_mime_type("a.tar.lzma"), Some("application/x-lzma-compressed-tar"));
        assert_eq!(guess_mime_type("a.tar.zst"), Some("application/x-zstd-compressed-tar"));
        assert_eq!(guess_mime_type("a.tar"), Some("application/x-tar"));
        assert_eq!(guess_mime_type("a.gem"), Some("application/x-ruby-gem"));
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let tar = tar_bytes(&[("pkg/README", b"hello", 0o644)]);
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar).unwrap();
        let archive = encoder.finish().unwrap();

        Extractor::new(ArchiveFormat::TarGzip)
            .extract(Cursor::new(archive), temp_dir.path())
            .unwrap();
        assert_eq!(fs::read(temp_dir.path().join("pkg/README")).unwrap(), b"hello");
    }

    #[test]
    fn test_sub_dir_filter() {
        let temp_dir = TempDir::new().unwrap();
        let archive = tar_bytes(&[("pkg/bin/run", b"run", 0o755), ("pkg/lib/x", b"x", 0o644)]);

        Extractor::new(ArchiveFormat::Tar)
            .with_sub_dir("pkg/bin")
            .unwrap()
            .extract(Cursor::new(archive), temp_dir.path())
            .unwrap();

        assert!(temp_dir.path().join("run").is_file());
        assert!(!temp_dir.path().join("lib").exists());
        assert!(!temp_dir.path().join("pkg").exists());
    }

    #[test]
    fn test_traversal_in_zip_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        let archive = zip_bytes(&[("../escaped", b"evil", 0o644)]);

        let result = Extractor::new(ArchiveFormat::Zip).extract(Cursor::new(archive), &target);
        assert!(matches!(result, Err(Error::ArchiveInvalid(_))));
        assert!(!temp_dir.path().join("escaped").exists());
    }

    #[test]
    fn test_zip_exec_bit_to_xbit() {
        let temp_dir = TempDir::new().unwrap();
        let archive = zip_bytes(&[("bin/run", b"#!/bin/sh", 0o755), ("doc", b"text", 0o644)]);

        Extractor::new(ArchiveFormat::Zip)
            .with_unix_fs(false)
            .extract(Cursor::new(archive), temp_dir.path())
            .unwrap();

        let xbits = flags::read(&temp_dir.path().join(flags::XBIT_FILE)).unwrap();
        assert_eq!(xbits.into_iter().collect::<Vec<_>>(), vec!["/bin/run".to_string()]);
    }

    #[test]
    fn test_start_offset() {
        let temp_dir = TempDir::new().unwrap();
        let mut data = b"#!stub-header\n".to_vec();
        let offset = data.len() as u64;
        data.extend(tar_bytes(&[("file", b"content", 0o644)]));

        Extractor::new(ArchiveFormat::Tar)
            .with_start_offset(offset)
            .extract(Cursor::new(data), temp_dir.path())
            .unwrap();
        assert_eq!(fs::read(temp_dir.path().join("file")).unwrap(), b"content");
    }

    #[test]
    fn test_offset_beyond_end() {
        let temp_dir = TempDir::new().unwrap();
        let result = Extractor::new(ArchiveFormat::Tar)
            .with_start_offset(100)
            .extract(Cursor::new(vec![0u8; 10]), temp_dir.path());
        assert!(matches!(result, Err(Error::ArchiveInvalid(_))));
    }

    #[test]
    fn test_corrupt_gzip_is_archive_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let result = Extractor::new(ArchiveFormat::TarGzip)
            .extract(Cursor::new(b"not a gzip stream at all".to_vec()), temp_dir.path());
        assert!(matches!(result, Err(Error::ArchiveInvalid(_))));
    }

    #[test]
    fn test_canceled_before_first_entry() {
        let temp_dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = Extractor::new(ArchiveFormat::Tar)
            .with_cancel(token)
            .extract(Cursor::new(tar_bytes(&[("file", b"x", 0o644)])), temp_dir.path());
        assert!(matches!(result, Err(Error::Canceled)));
        assert!(!temp_dir.path().join("file").exists());
    }

    #[test]
    fn test_gem_payload() {
        let temp_dir = TempDir::new().unwrap();
        let payload = tar_bytes(&[("lib/gem.rb", b"puts 1", 0o644)]);
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let data_tar_gz = encoder.finish().unwrap();
        let gem = tar_bytes(&[("metadata.gz", b"meta", 0o644), ("data.tar.gz", &data_tar_gz, 0o644)]);

        Extractor::new(ArchiveFormat::RubyGem)
            .extract(Cursor::new(gem), temp_dir.path())
            .unwrap();
        assert_eq!(fs::read(temp_dir.path().join("lib/gem.rb")).unwrap(), b"puts 1");
        assert!(!temp_dir.path().join("metadata.gz").exists());
    }
}
