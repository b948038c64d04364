// src/manifest/mod.rs

//! Manifests: the canonical text description of an implementation tree
//!
//! A manifest lists every directory, file and symlink of a tree in a fixed
//! order together with content hashes, sizes and modification times. Hashing
//! the manifest text yields the implementation's digest, so two trees share a
//! digest exactly when their manifests are byte-identical.
//!
//! Line layout:
//!
//! ```text
//! D /subdir
//! F <hash> <mtime> <size> <name>
//! X <hash> <mtime> <size> <name>
//! S <hash> <size> <name>
//! ```

mod digest;
mod format;
mod generator;

pub use digest::ManifestDigest;
pub use format::ManifestFormat;
pub use generator::{generate, ManifestGenerator};

use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the manifest file saved inside committed implementations
pub const MANIFEST_FILE: &str = ".manifest";

/// One line of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestNode {
    /// Directory, path relative to the root with a leading slash
    Directory { path: String },
    /// Regular file, executable or not
    File {
        hash: String,
        mtime: i64,
        size: u64,
        name: String,
        executable: bool,
    },
    /// Symlink, hashed over its target
    Symlink { hash: String, size: u64, name: String },
}

impl ManifestNode {
    /// Parse one manifest line
    pub fn parse(line: &str) -> Result<Self> {
        let invalid = || Error::ParseError(format!("Invalid manifest line: {}", line));

        let (kind, rest) = line.split_once(' ').ok_or_else(invalid)?;
        match kind {
            "D" => {
                // Old layout puts the mtime before the path
                let path = match rest.split_once(' ') {
                    Some((mtime, path)) if mtime.parse::<i64>().is_ok() && path.starts_with('/') => path,
                    _ => rest,
                };
                if !path.starts_with('/') {
                    return Err(invalid());
                }
                Ok(Self::Directory {
                    path: path.to_string(),
                })
            }
            "F" | "X" => {
                let mut parts = rest.splitn(4, ' ');
                let hash = parts.next().ok_or_else(invalid)?;
                let mtime = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
                let size = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
                let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(invalid)?;
                Ok(Self::File {
                    hash: hash.to_string(),
                    mtime,
                    size,
                    name: name.to_string(),
                    executable: kind == "X",
                })
            }
            "S" => {
                let mut parts = rest.splitn(3, ' ');
                let hash = parts.next().ok_or_else(invalid)?;
                let size = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
                let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(invalid)?;
                Ok(Self::Symlink {
                    hash: hash.to_string(),
                    size,
                    name: name.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ManifestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory { path } => write!(f, "D {}", path),
            Self::File {
                hash,
                mtime,
                size,
                name,
                executable,
            } => {
                let kind = if *executable { 'X' } else { 'F' };
                write!(f, "{} {} {} {} {}", kind, hash, mtime, size, name)
            }
            Self::Symlink { hash, size, name } => write!(f, "S {} {} {}", hash, size, name),
        }
    }
}

/// An ordered list of manifest nodes in a given format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    format: ManifestFormat,
    nodes: Vec<ManifestNode>,
}

impl Manifest {
    pub fn new(format: ManifestFormat, nodes: Vec<ManifestNode>) -> Self {
        Self { format, nodes }
    }

    pub fn format(&self) -> ManifestFormat {
        self.format
    }

    pub fn nodes(&self) -> &[ManifestNode] {
        &self.nodes
    }

    /// Manifest text: one line per node, each terminated by `\n`
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for node in &self.nodes {
            text.push_str(&node.to_string());
            text.push('\n');
        }
        text
    }

    /// Parse manifest text
    pub fn parse(text: &str, format: ManifestFormat) -> Result<Self> {
        let nodes = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(ManifestNode::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(format, nodes))
    }

    /// Load a manifest file
    pub fn load(path: &Path, format: ManifestFormat) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text, format)
    }

    /// Write the manifest to `path` and return its digest id
    pub fn save(&self, path: &Path) -> Result<String> {
        let text = self.to_text();
        fs::write(path, &text)?;
        self.format.digest_manifest(text.as_bytes()).map(|hash| self.format.id_for(&hash))
    }

    /// Digest id of this manifest (for example `sha256new_...`)
    pub fn calculate_digest(&self) -> Result<String> {
        let hash = self.format.digest_manifest(self.to_text().as_bytes())?;
        Ok(self.format.id_for(&hash))
    }

    /// Total size of all regular files and symlinks
    pub fn total_size(&self) -> u64 {
        self.nodes
            .iter()
            .map(|node| match node {
                ManifestNode::File { size, .. } | ManifestNode::Symlink { size, .. } => *size,
                ManifestNode::Directory { .. } => 0,
            })
            .sum()
    }

    /// Regular files with their path relative to the tree root
    pub fn files(&self) -> Vec<(PathBuf, &ManifestNode)> {
        let mut current_dir = PathBuf::new();
        let mut files = Vec::new();
        for node in &self.nodes {
            match node {
                ManifestNode::Directory { path } => {
                    current_dir = PathBuf::from(path.trim_start_matches('/'));
                }
                ManifestNode::File { name, .. } => files.push((current_dir.join(name), node)),
                ManifestNode::Symlink { .. } => {}
            }
        }
        files
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Manifest {
        Manifest::new(
            ManifestFormat::Sha256,
            vec![
                ManifestNode::File {
                    hash: "aa".to_string(),
                    mtime: 946684800,
                    size: 3,
                    name: "file".to_string(),
                    executable: false,
                },
                ManifestNode::Directory {
                    path: "/bin".to_string(),
                },
                ManifestNode::File {
                    hash: "bb".to_string(),
                    mtime: 946684800,
                    size: 5,
                    name: "run me".to_string(),
                    executable: true,
                },
                ManifestNode::Symlink {
                    hash: "cc".to_string(),
                    size: 6,
                    name: "link".to_string(),
                },
            ],
        )
    }

    #[test]
    fn test_text_layout() {
        assert_eq!(
            sample().to_text(),
            "F aa 946684800 3 file\nD /bin\nX bb 946684800 5 run me\nS cc 6 link\n"
        );
    }

    #[test]
    fn test_parse_text() {
        let text = sample().to_text();
        let parsed = Manifest::parse(&text, ManifestFormat::Sha256).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_parse_old_directory_line() {
        let node = ManifestNode::parse("D 1234 /sub dir").unwrap();
        assert_eq!(
            node,
            ManifestNode::Directory {
                path: "/sub dir".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ManifestNode::parse("Q what").is_err());
        assert!(ManifestNode::parse("F abc notanumber 3 name").is_err());
        assert!(ManifestNode::parse("D relative").is_err());
        assert!(ManifestNode::parse("S abc 3").is_err());
    }

    #[test]
    fn test_files_and_size() {
        let manifest = sample();
        let files: Vec<PathBuf> = manifest.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(files, vec![PathBuf::from("file"), PathBuf::from("bin/run me")]);
        assert_eq!(manifest.total_size(), 14);
    }

    #[test]
    fn test_save_returns_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(MANIFEST_FILE);
        let manifest = Manifest::new(ManifestFormat::Sha256New, Vec::new());

        let digest = manifest.save(&path).unwrap();
        assert_eq!(digest, "sha256new_4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ");
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert_eq!(manifest.calculate_digest().unwrap(), digest);
    }
}
