// src/archive/zipfile.rs

//! Zip reader

use super::tree::TreeWriter;
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use chrono::NaiveDate;
use std::io::{Read, Seek};
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

pub(crate) fn extract_zip<R: Read + Seek>(
    reader: R,
    writer: &mut TreeWriter<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| Error::ArchiveInvalid(format!("Failed to read zip archive: {}", e)))?;

    for index in 0..archive.len() {
        cancel.check()?;
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::ArchiveInvalid(format!("Corrupt zip entry: {}", e)))?;

        let name = entry.name().to_string();
        let Some(relative) = writer.map_entry(&name)? else {
            continue;
        };

        let mtime = dos_to_unix(entry.last_modified());
        let mode = entry.unix_mode().unwrap_or(0);

        if entry.is_dir() {
            writer.create_dir(&relative, mtime)?;
        } else if mode & S_IFMT == S_IFLNK {
            let mut target = String::new();
            entry.read_to_string(&mut target).map_err(|e| {
                Error::ArchiveInvalid(format!("Unreadable symlink {} in zip: {}", name, e))
            })?;
            writer.write_symlink(&relative, &target)?;
        } else {
            writer.write_file(&relative, &mut entry, mtime, mode & 0o111 != 0)?;
        }
    }
    Ok(())
}

/// Zip timestamps carry no zone; they are read as UTC
fn dos_to_unix(time: zip::DateTime) -> Option<i64> {
    let date = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?;
    let date_time = date.and_hms_opt(
        time.hour().into(),
        time.minute().into(),
        time.second().into(),
    )?;
    Some(date_time.and_utc().timestamp())
}
