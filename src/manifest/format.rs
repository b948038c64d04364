// src/manifest/format.rs

//! Manifest digest formats
//!
//! A format fixes three things: the hash algorithm, how the final manifest
//! hash is serialised, and the prefix/separator used in implementation ids
//! and cache directory names.

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManifestFormat {
    /// SHA-256, base32 manifest hash, `_` separator
    Sha256New,
    /// SHA-256, hex manifest hash
    Sha256,
    /// SHA-1, new manifest layout
    Sha1New,
    /// SHA-1, old manifest layout with directory mtimes
    Sha1,
}

impl ManifestFormat {
    /// All formats, strongest first
    pub const ALL: [ManifestFormat; 4] = [Self::Sha256New, Self::Sha256, Self::Sha1New, Self::Sha1];

    /// Formats worth generating for new implementations
    pub const RECOMMENDED: [ManifestFormat; 3] = [Self::Sha256New, Self::Sha256, Self::Sha1New];

    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Sha256New => "sha256new",
            Self::Sha256 => "sha256",
            Self::Sha1New => "sha1new",
            Self::Sha1 => "sha1",
        }
    }

    /// Character between prefix and hash in ids
    pub const fn separator(&self) -> char {
        match self {
            Self::Sha256New => '_',
            _ => '=',
        }
    }

    pub const fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha256New | Self::Sha256 => HashAlgorithm::Sha256,
            Self::Sha1New | Self::Sha1 => HashAlgorithm::Sha1,
        }
    }

    /// Whether manifests in this format can be computed
    pub const fn is_supported(&self) -> bool {
        self.algorithm().is_supported()
    }

    /// Detect the format of an id such as `sha256new_ABC...`
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| {
            id.strip_prefix(format.prefix())
                .is_some_and(|rest| rest.starts_with(format.separator()))
        })
    }

    /// Split an id into its format and hash value
    pub fn split_id(id: &str) -> Option<(Self, &str)> {
        let format = Self::from_id(id)?;
        let hash = &id[format.prefix().len() + 1..];
        Some((format, hash))
    }

    /// Build an id from a hash value
    pub fn id_for(&self, hash: &str) -> String {
        format!("{}{}{}", self.prefix(), self.separator(), hash)
    }

    /// Check that a hash value is well-formed for this format
    pub fn is_valid_hash(&self, hash: &str) -> bool {
        match self {
            Self::Sha256New => hash::is_base32(hash),
            _ => !hash.is_empty() && hash.bytes().all(|b| b.is_ascii_hexdigit()),
        }
    }

    /// Hash file content the way manifest lines record it (lower-case hex)
    pub fn digest_content<R: Read>(&self, reader: R) -> Result<String> {
        let digest = hash::hash_reader(self.algorithm(), reader)?;
        Ok(hash::to_hex(&digest))
    }

    /// Hash a complete manifest text into the id's hash value
    pub fn digest_manifest(&self, manifest_text: &[u8]) -> Result<String> {
        let digest = hash::hash_bytes(self.algorithm(), manifest_text)?;
        Ok(match self {
            Self::Sha256New => hash::to_base32(&digest),
            _ => hash::to_hex(&digest),
        })
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

impl FromStr for ManifestFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.prefix().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::ParseError(format!("Unknown manifest format: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_id_prefers_longest_prefix() {
        assert_eq!(ManifestFormat::from_id("sha256new_ABC"), Some(ManifestFormat::Sha256New));
        assert_eq!(ManifestFormat::from_id("sha256=abc"), Some(ManifestFormat::Sha256));
        assert_eq!(ManifestFormat::from_id("sha1new=abc"), Some(ManifestFormat::Sha1New));
        assert_eq!(ManifestFormat::from_id("sha1=abc"), Some(ManifestFormat::Sha1));
        assert_eq!(ManifestFormat::from_id("sha256new=abc"), None);
        assert_eq!(ManifestFormat::from_id("md5=abc"), None);
        assert_eq!(ManifestFormat::from_id("tmp-1234"), None);
    }

    #[test]
    fn test_split_and_build_id() {
        let (format, hash) = ManifestFormat::split_id("sha256=deadbeef").unwrap();
        assert_eq!(format, ManifestFormat::Sha256);
        assert_eq!(hash, "deadbeef");
        assert_eq!(format.id_for(hash), "sha256=deadbeef");
        assert_eq!(ManifestFormat::Sha256New.id_for("XYZ"), "sha256new_XYZ");
    }

    #[test]
    fn test_hash_validation() {
        assert!(ManifestFormat::Sha256.is_valid_hash("0123abcdef"));
        assert!(!ManifestFormat::Sha256.is_valid_hash("../etc"));
        assert!(!ManifestFormat::Sha256.is_valid_hash(""));
        assert!(ManifestFormat::Sha256New.is_valid_hash("4OYMIQUY7QOBJGX36TEJ"));
        assert!(!ManifestFormat::Sha256New.is_valid_hash("abc/def"));
    }

    #[test]
    fn test_digest_empty_manifest() {
        assert_eq!(
            ManifestFormat::Sha256New.digest_manifest(b"").unwrap(),
            "4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ"
        );
        assert_eq!(
            ManifestFormat::Sha256.digest_manifest(b"").unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(ManifestFormat::Sha1New.digest_manifest(b"").is_err());
    }

    #[test]
    fn test_support_and_parse() {
        assert!(ManifestFormat::Sha256New.is_supported());
        assert!(!ManifestFormat::Sha1New.is_supported());
        assert_eq!("SHA256NEW".parse::<ManifestFormat>().unwrap(), ManifestFormat::Sha256New);
        assert!("crc32".parse::<ManifestFormat>().is_err());
    }
}
