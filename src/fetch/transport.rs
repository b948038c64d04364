// src/fetch/transport.rs

//! Moving archive bytes from an href into a local file
//!
//! [`HttpTransport`] wraps a blocking reqwest client with retries,
//! [`FileTransport`] reads local paths and `file://` URLs, and
//! [`DefaultTransport`] picks one by URL scheme.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use reqwest::blocking::Client;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for one download
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Source of archive bytes
pub trait Transport: Send + Sync {
    /// Copy the content behind `href` into `dest`, returning the byte count
    fn download(
        &self,
        href: &str,
        dest: &mut dyn Write,
        progress: &dyn ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Copy a stream in chunks, checking for cancellation between chunks
fn stream_to(
    reader: &mut dyn Read,
    dest: &mut dyn Write,
    progress: &dyn ProgressTracker,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    let mut copied: u64 = 0;

    loop {
        cancel.check()?;
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;
        if bytes_read == 0 {
            break;
        }

        dest.write_all(&buffer[..bytes_read])
            .map_err(|e| Error::IoError(format!("Failed to write data: {e}")))?;
        copied += bytes_read as u64;
        progress.set_position(copied);
    }

    dest.flush()?;
    Ok(copied)
}

/// HTTP(S) downloads with retry support
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Override the number of attempts per download
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

impl Transport for HttpTransport {
    fn download(
        &self,
        href: &str,
        dest: &mut dyn Write,
        progress: &dyn ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        info!("Downloading {}", href);

        let mut attempt = 0;
        loop {
            attempt += 1;
            cancel.check()?;
            match self.client.get(href).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            href
                        )));
                    }

                    if let Some(total_size) = response.content_length() {
                        progress.set_length(total_size);
                    }

                    let downloaded = stream_to(&mut response, dest, progress, cancel)?;
                    info!("Downloaded {} bytes from {}", downloaded, href);
                    return Ok(downloaded);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to download {href} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

/// Local files, as plain paths or `file://` URLs
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    fn local_path(href: &str) -> Result<PathBuf> {
        if href.starts_with("file:") {
            let url = Url::parse(href)
                .map_err(|e| Error::DownloadError(format!("Invalid URL {}: {}", href, e)))?;
            return url
                .to_file_path()
                .map_err(|_| Error::DownloadError(format!("Not a local file URL: {}", href)));
        }
        Ok(PathBuf::from(href))
    }
}

impl Transport for FileTransport {
    fn download(
        &self,
        href: &str,
        dest: &mut dyn Write,
        progress: &dyn ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let path = Self::local_path(href)?;
        let mut file = File::open(&path).map_err(|e| {
            Error::DownloadError(format!("Cannot open {}: {}", path.display(), e))
        })?;
        if let Ok(metadata) = file.metadata() {
            progress.set_length(metadata.len());
        }

        debug!("Copying {}", path.display());
        stream_to(&mut file, dest, progress, cancel)
    }
}

/// Dispatches on the href's scheme
pub struct DefaultTransport {
    http: HttpTransport,
    file: FileTransport,
}

impl DefaultTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpTransport::new()?,
            file: FileTransport,
        })
    }
}

impl Transport for DefaultTransport {
    fn download(
        &self,
        href: &str,
        dest: &mut dyn Write,
        progress: &dyn ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        match Url::parse(href) {
            Ok(url) => match url.scheme() {
                "http" | "https" => self.http.download(href, dest, progress, cancel),
                "file" => self.file.download(href, dest, progress, cancel),
                scheme => Err(Error::UnsupportedFormat(format!(
                    "Unsupported URL scheme '{}' in {}",
                    scheme, href
                ))),
            },
            // Plain paths have no scheme
            Err(_) => self.file.download(href, dest, progress, cancel),
        }
    }
}
