// src/fetch/model.rs

//! Retrieval methods: where an implementation's bytes come from
//!
//! Serialised as JSON so batches can be read from a file:
//!
//! ```json
//! [{
//!   "digest": {"sha256new": "4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ"},
//!   "retrieval_methods": [
//!     {"type": "archive", "href": "https://example.com/app.tar.gz", "size": 1024},
//!     {"type": "recipe", "steps": [
//!       {"type": "archive", "href": "https://mirror.example.com/base.zip", "size": 512},
//!       {"type": "archive", "href": "https://mirror.example.com/extra.zip", "size": 64,
//!        "destination": "share"}
//!     ]}
//!   ]
//! }]
//! ```

use crate::archive::{guess_mime_type, ArchiveFormat};
use crate::error::{Error, Result};
use crate::manifest::ManifestDigest;
use serde::{Deserialize, Serialize};

/// An implementation to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub digest: ManifestDigest,
    #[serde(default)]
    pub retrieval_methods: Vec<RetrievalMethod>,
}

impl Implementation {
    pub fn new(digest: ManifestDigest) -> Self {
        Self {
            digest,
            retrieval_methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: RetrievalMethod) -> Self {
        self.retrieval_methods.push(method);
        self
    }
}

/// One way of obtaining an implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// A single archive
    Archive(Archive),
    /// Several archives overlaid into one tree
    Recipe(Recipe),
}

impl RetrievalMethod {
    /// Short description for problem reports
    pub fn describe(&self) -> String {
        match self {
            Self::Archive(archive) => format!("archive {}", archive.href),
            Self::Recipe(recipe) => format!("recipe with {} step(s)", recipe.steps.len()),
        }
    }
}

/// A downloadable archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// URL or local path
    pub href: String,
    /// Archive MIME type; guessed from `href` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size of the archive proper, excluding `start_offset`
    pub size: u64,
    /// Leading bytes to skip before the archive starts
    #[serde(default)]
    pub start_offset: u64,
    /// Sub-directory of the archive to extract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<String>,
    /// Sub-directory of the implementation to extract into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl Archive {
    pub fn new(href: impl Into<String>, size: u64) -> Self {
        Self {
            href: href.into(),
            mime_type: None,
            size,
            start_offset: 0,
            extract: None,
            destination: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_start_offset(mut self, start_offset: u64) -> Self {
        self.start_offset = start_offset;
        self
    }

    pub fn with_extract(mut self, extract: impl Into<String>) -> Self {
        self.extract = Some(extract.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Declared MIME type, or one guessed from the file name
    pub fn effective_mime_type(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .or_else(|| guess_mime_type(self.href.rsplit('/').next().unwrap_or(&self.href)))
    }

    /// MIME type the extractor will use, or an error when it has none
    pub fn resolve_format(&self) -> Result<ArchiveFormat> {
        let mime_type = self.effective_mime_type().ok_or_else(|| {
            Error::UnsupportedFormat(format!("Cannot determine archive type of {}", self.href))
        })?;
        ArchiveFormat::from_mime_type(mime_type)
    }

    /// Bytes the download must produce
    pub fn download_size(&self) -> Result<u64> {
        self.size.checked_add(self.start_offset).ok_or_else(|| {
            Error::ParseError(format!(
                "Size {} plus offset {} of {} is out of range",
                self.size, self.start_offset, self.href
            ))
        })
    }
}

/// Ordered archive steps applied to one tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub steps: Vec<RecipeStep>,
}

impl Recipe {
    pub fn new(steps: Vec<RecipeStep>) -> Self {
        Self { steps }
    }
}

/// One step of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecipeStep {
    Archive(Archive),
    /// A step kind this store cannot perform
    #[serde(other)]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "digest": {"sha256new": "4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ"},
            "retrieval_methods": [
                {"type": "archive", "href": "https://example.com/app.zip", "size": 10},
                {"type": "recipe", "steps": [
                    {"type": "archive", "href": "base.tar.gz", "size": 5, "start_offset": 2},
                    {"type": "rename", "source": "a", "dest": "b"}
                ]}
            ]
        }"#;

        let implementation: Implementation = serde_json::from_str(json).unwrap();
        assert_eq!(implementation.retrieval_methods.len(), 2);

        let RetrievalMethod::Recipe(recipe) = &implementation.retrieval_methods[1] else {
            panic!("expected recipe");
        };
        assert_eq!(recipe.steps[1], RecipeStep::Unsupported);
        let RecipeStep::Archive(archive) = &recipe.steps[0] else {
            panic!("expected archive step");
        };
        assert_eq!(archive.download_size().unwrap(), 7);

        let huge = Archive::new("huge.zip", u64::MAX).with_start_offset(1);
        assert!(matches!(huge.download_size(), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_effective_mime_type() {
        let archive = Archive::new("https://example.com/dist/app-1.0.tar.bz2", 1);
        assert_eq!(archive.effective_mime_type(), Some("application/x-bzip-compressed-tar"));
        assert_eq!(archive.resolve_format().unwrap(), ArchiveFormat::TarBzip2);

        let archive = archive.with_mime_type("application/zip");
        assert_eq!(archive.resolve_format().unwrap(), ArchiveFormat::Zip);

        let unknown = Archive::new("https://example.com/download?id=3", 1);
        assert!(matches!(unknown.resolve_format(), Err(Error::UnsupportedFormat(_))));
    }
}
