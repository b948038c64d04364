// src/manifest/digest.rs

//! Manifest digests identifying implementations

use super::ManifestFormat;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The digests of one implementation, at most one per format
///
/// All set fields describe the same directory tree. The strongest one names
/// the cache directory; weaker ones stay usable for looking up legacy
/// entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestDigest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1new: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256new: Option<String>,
}

impl ManifestDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single id such as `sha256new_ABC...`
    pub fn from_id(id: &str) -> Result<Self> {
        let mut digest = Self::new();
        digest.insert_id(id)?;
        Ok(digest)
    }

    /// Parse and merge several ids of the same implementation
    pub fn from_ids<'a, I>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut digest = Self::new();
        for id in ids {
            digest.insert_id(id)?;
        }
        if digest.is_empty() {
            return Err(Error::ParseError("No digest given".to_string()));
        }
        Ok(digest)
    }

    /// Interpret a cache directory name, returning `None` for anything that
    /// is not a well-formed digest
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::from_id(name).ok()
    }

    /// Builder-style setter for one format
    pub fn with(mut self, format: ManifestFormat, hash: impl Into<String>) -> Self {
        *self.slot_mut(format) = Some(hash.into());
        self
    }

    fn insert_id(&mut self, id: &str) -> Result<()> {
        let id = id.trim();
        let (format, hash) = ManifestFormat::split_id(id)
            .ok_or_else(|| Error::ParseError(format!("Not a known digest format: {}", id)))?;
        if !format.is_valid_hash(hash) {
            return Err(Error::ParseError(format!("Malformed {} digest: {}", format, id)));
        }
        *self.slot_mut(format) = Some(hash.to_string());
        Ok(())
    }

    fn slot_mut(&mut self, format: ManifestFormat) -> &mut Option<String> {
        match format {
            ManifestFormat::Sha1 => &mut self.sha1,
            ManifestFormat::Sha1New => &mut self.sha1new,
            ManifestFormat::Sha256 => &mut self.sha256,
            ManifestFormat::Sha256New => &mut self.sha256new,
        }
    }

    /// Hash value recorded for a format
    pub fn get(&self, format: ManifestFormat) -> Option<&str> {
        match format {
            ManifestFormat::Sha1 => self.sha1.as_deref(),
            ManifestFormat::Sha1New => self.sha1new.as_deref(),
            ManifestFormat::Sha256 => self.sha256.as_deref(),
            ManifestFormat::Sha256New => self.sha256new.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.formats().next().is_none()
    }

    /// Set formats with their hash values, strongest first
    pub fn formats(&self) -> impl Iterator<Item = (ManifestFormat, &str)> + '_ {
        ManifestFormat::ALL
            .into_iter()
            .filter_map(move |format| self.get(format).map(|hash| (format, hash)))
    }

    /// All ids, strongest first
    pub fn available(&self) -> Vec<String> {
        self.formats()
            .map(|(format, hash)| format.id_for(hash))
            .collect()
    }

    /// Strongest id, used to name the cache directory
    pub fn best(&self) -> Option<String> {
        self.formats().next().map(|(format, hash)| format.id_for(hash))
    }

    /// Strongest format this build can actually compute
    pub fn best_supported(&self) -> Option<(ManifestFormat, &str)> {
        self.formats().find(|(format, _)| format.is_supported())
    }

    /// True if both sides share at least one format and no shared format
    /// disagrees
    pub fn partial_eq(&self, other: &ManifestDigest) -> bool {
        let mut shared = 0;
        for format in ManifestFormat::ALL {
            if let (Some(a), Some(b)) = (self.get(format), other.get(format)) {
                if a != b {
                    return false;
                }
                shared += 1;
            }
        }
        shared > 0
    }
}

impl fmt::Display for ManifestDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.best() {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "(empty digest)"),
        }
    }
}

impl FromStr for ManifestDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_ids(s.split([',', ' ']).filter(|part| !part.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const SHA256NEW: &str = "4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ";

    #[test]
    fn test_parse_single_id() {
        let digest = ManifestDigest::from_id(&format!("sha256new_{}", SHA256NEW)).unwrap();
        assert_eq!(digest.sha256new.as_deref(), Some(SHA256NEW));
        assert!(digest.sha256.is_none());
        assert_eq!(digest.best().unwrap(), format!("sha256new_{}", SHA256NEW));
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(ManifestDigest::from_id("md5=abc").is_err());
        assert!(ManifestDigest::from_id("sha256=../../etc").is_err());
        assert!(ManifestDigest::from_id("sha256new_").is_err());
        assert!(ManifestDigest::from_dir_name("tmp-123").is_none());
    }

    #[test]
    fn test_available_is_in_preference_order() {
        let sha256_id = format!("sha256={}", SHA256);
        let sha256new_id = format!("sha256new_{}", SHA256NEW);
        let digest =
            ManifestDigest::from_ids(["sha1new=abc", sha256_id.as_str(), sha256new_id.as_str()])
                .unwrap();

        assert_eq!(
            digest.available(),
            vec![
                format!("sha256new_{}", SHA256NEW),
                format!("sha256={}", SHA256),
                "sha1new=abc".to_string(),
            ]
        );
        assert_eq!(digest.to_string(), format!("sha256new_{}", SHA256NEW));
    }

    #[test]
    fn test_best_supported_skips_sha1() {
        let digest = ManifestDigest::new().with(ManifestFormat::Sha1New, "abc");
        assert_eq!(digest.best().unwrap(), "sha1new=abc");
        assert!(digest.best_supported().is_none());

        let digest = digest.with(ManifestFormat::Sha256, SHA256);
        assert_eq!(digest.best_supported(), Some((ManifestFormat::Sha256, SHA256)));
    }

    #[test]
    fn test_partial_eq() {
        let a = ManifestDigest::new()
            .with(ManifestFormat::Sha1New, "abc")
            .with(ManifestFormat::Sha256, "def");
        let b = ManifestDigest::new().with(ManifestFormat::Sha256, "def");
        let c = ManifestDigest::new()
            .with(ManifestFormat::Sha1New, "abc")
            .with(ManifestFormat::Sha256, "fff");
        let d = ManifestDigest::new().with(ManifestFormat::Sha256New, "XYZ");

        assert!(a.partial_eq(&b));
        assert!(!a.partial_eq(&c));
        assert!(!a.partial_eq(&d));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_str_accepts_lists() {
        let digest: ManifestDigest = "sha1new=abc, sha256=def".parse().unwrap();
        assert_eq!(digest.sha1new.as_deref(), Some("abc"));
        assert_eq!(digest.sha256.as_deref(), Some("def"));
        assert!("".parse::<ManifestDigest>().is_err());
    }

    #[test]
    fn test_serde_skips_missing_formats() {
        let digest = ManifestDigest::new().with(ManifestFormat::Sha256, "def");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, r#"{"sha256":"def"}"#);
        let back: ManifestDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
