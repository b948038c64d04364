// src/hash.rs

//! Hashing primitives for manifests and file contents
//!
//! Manifest digests are built from two layers of hashing: every file's
//! content hash goes into a manifest line, and the manifest text itself is
//! hashed to produce the digest. Both layers use the same algorithm.
//!
//! | Algorithm | Computable | Used by |
//! |-----------|------------|---------|
//! | SHA-256   | yes        | `sha256=`, `sha256new_` |
//! | SHA-1     | no         | `sha1=`, `sha1new=` (legacy, recognised only) |

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Buffer size for streaming file contents through a hasher
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1, only kept so legacy digests can be parsed and compared
    Sha1,
    /// SHA-256
    Sha256,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Whether this build can compute the algorithm
    #[inline]
    pub const fn is_supported(&self) -> bool {
        matches!(self, Self::Sha256)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash computation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Algorithm is recognised but cannot be computed
    Unsupported(HashAlgorithm),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::Unsupported(algorithm) => {
                write!(f, "hash algorithm {} cannot be computed", algorithm)
            }
        }
    }
}

impl std::error::Error for HashError {}

impl From<HashError> for crate::Error {
    fn from(err: HashError) -> Self {
        crate::Error::Misconfiguration(err.to_string())
    }
}

/// Incremental hasher
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
}

impl Hasher {
    /// Create a new hasher, failing for algorithms this build cannot compute
    pub fn new(algorithm: HashAlgorithm) -> Result<Self, HashError> {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha1 => return Err(HashError::Unsupported(algorithm)),
        };
        Ok(Self { state })
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Finalize and return the raw digest bytes
    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            HasherState::Sha256(hasher) => hasher.finalize().to_vec(),
        }
    }
}

/// Compute the raw digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, HashError> {
    let mut hasher = Hasher::new(algorithm)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

/// Stream a reader through a hasher and return the raw digest
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, mut reader: R) -> crate::Result<Vec<u8>> {
    let mut hasher = Hasher::new(algorithm)?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}

/// Lower-case hex encoding
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// RFC 4648 base32 encoding, upper case, without padding
pub fn to_base32(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &byte in bytes {
        buffer = ((buffer << 8) | u32::from(byte)) & 0xfff;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Check that a string only uses the base32 alphabet
pub fn is_base32(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| BASE32_ALPHABET.contains(&b.to_ascii_uppercase()))
}

/// SHA-256 of a byte slice as lower-case hex
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_sha1_is_recognised_but_not_computable() {
        let algorithm: HashAlgorithm = "SHA-1".parse().unwrap();
        assert_eq!(algorithm, HashAlgorithm::Sha1);
        assert!(!algorithm.is_supported());
        assert!(matches!(
            hash_bytes(algorithm, b"abc"),
            Err(HashError::Unsupported(HashAlgorithm::Sha1))
        ));
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_hash_reader_matches_hash_bytes() {
        let data = vec![7u8; 200_000];
        let streamed = hash_reader(HashAlgorithm::Sha256, data.as_slice()).unwrap();
        let direct = hash_bytes(HashAlgorithm::Sha256, &data).unwrap();
        assert_eq!(streamed, direct);
        assert_eq!(streamed.len(), HashAlgorithm::Sha256.output_len());
    }

    #[test]
    fn test_base32_rfc4648_vectors() {
        assert_eq!(to_base32(b""), "");
        assert_eq!(to_base32(b"f"), "MY");
        assert_eq!(to_base32(b"fo"), "MZXQ");
        assert_eq!(to_base32(b"foo"), "MZXW6");
        assert_eq!(to_base32(b"foob"), "MZXW6YQ");
        assert_eq!(to_base32(b"fooba"), "MZXW6YTB");
        assert_eq!(to_base32(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn test_base32_of_empty_sha256() {
        let digest = hash_bytes(HashAlgorithm::Sha256, b"").unwrap();
        assert_eq!(
            to_base32(&digest),
            "4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ"
        );
        assert!(is_base32("4OYMIQUY7QOBJGX36TEJS35ZEQT24QPEMSNZGTFESWMRW6CSXBKQ"));
        assert!(!is_base32("not-base32!"));
    }
}
