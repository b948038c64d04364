// src/archive/tarball.rs

//! Tar reader, shared by plain and compressed tarballs and Ruby gems

use super::tree::TreeWriter;
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use std::io::Read;
use tar::{Archive, EntryType};
use tracing::debug;

/// Name of the payload tarball inside a Ruby gem
const GEM_PAYLOAD: &str = "data.tar.gz";

pub(crate) fn extract_tar<R: Read>(
    reader: R,
    writer: &mut TreeWriter<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| Error::ArchiveInvalid(format!("Failed to read tar archive: {}", e)))?;

    for entry in entries {
        cancel.check()?;
        let mut entry =
            entry.map_err(|e| Error::ArchiveInvalid(format!("Corrupt tar entry: {}", e)))?;

        let name = utf8_name(&entry.path_bytes())?;
        let Some(relative) = writer.map_entry(&name)? else {
            continue;
        };

        let header = entry.header();
        let entry_type = header.entry_type();
        let mtime = header.mtime().ok().map(|m| m as i64);

        match entry_type {
            EntryType::Directory => writer.create_dir(&relative, mtime)?,
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                let executable = header.mode().map(|mode| mode & 0o111 != 0).unwrap_or(false);
                writer.write_file(&relative, &mut entry, mtime, executable)?;
            }
            EntryType::Symlink => {
                let target = link_name(&entry)?;
                writer.write_symlink(&relative, &target)?;
            }
            EntryType::Link => {
                let target = link_name(&entry)?;
                writer.write_hard_link(&relative, &target)?;
            }
            other => {
                debug!("Skipping tar entry {} of type {:?}", name, other);
            }
        }
    }
    Ok(())
}

/// Extract the `data.tar.gz` payload of a gem
pub(crate) fn extract_gem<R: Read>(
    reader: R,
    writer: &mut TreeWriter<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| Error::ArchiveInvalid(format!("Failed to read gem: {}", e)))?;

    for entry in entries {
        cancel.check()?;
        let entry = entry.map_err(|e| Error::ArchiveInvalid(format!("Corrupt gem entry: {}", e)))?;
        if utf8_name(&entry.path_bytes())? == GEM_PAYLOAD {
            return extract_tar(flate2::read::GzDecoder::new(entry), writer, cancel);
        }
    }

    Err(Error::ArchiveInvalid(format!("Gem contains no {}", GEM_PAYLOAD)))
}

fn utf8_name(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Error::ArchiveInvalid(format!("Non UTF-8 entry name: {:?}", bytes)))
}

fn link_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let bytes = entry
        .link_name_bytes()
        .ok_or_else(|| Error::ArchiveInvalid("Link entry without a target".to_string()))?;
    utf8_name(&bytes)
}
