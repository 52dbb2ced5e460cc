//! Content hashing
//!
//! Digests are only compared for equality, so the one requirement is that the
//! local computation and the remote tool agree byte for byte. Local input is
//! read in fixed 1 MiB blocks, so arbitrarily large files hash in bounded
//! memory.

use regex::Regex;
use serde::{Deserialize, Serialize};
use shellexec::ShellCommand;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::LazyLock;

/// Size of each block read while hashing
pub const BLOCK_SIZE: usize = 1024 * 1024;

static HEX_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{64}\b").expect("valid regex"));

/// Hash function used on both sides of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256, `sha256sum` on the target (coreutils)
    #[default]
    Sha256,
    /// BLAKE3, `b3sum` on the target
    Blake3,
}

impl DigestAlgorithm {
    /// The command printing the digest of `path` on the target
    pub fn remote_command(self, path: &str) -> ShellCommand {
        match self {
            Self::Sha256 => ShellCommand::new("sha256sum").arg("--").arg(path),
            Self::Blake3 => ShellCommand::new("b3sum")
                .arg("--no-names")
                .arg("--")
                .arg(path),
        }
    }

    fn hasher(self) -> Hasher {
        match self {
            Self::Sha256 => Hasher::Sha256(<sha2::Sha256 as sha2::Digest>::new()),
            Self::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

enum Hasher {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => sha2::Digest::update(h, data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Digest {
        match self {
            Self::Sha256(h) => Digest(format!("{:x}", sha2::Digest::finalize(h))),
            Self::Blake3(h) => Digest(h.finalize().to_hex().to_string()),
        }
    }
}

/// A content digest as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Extract a digest from tool output such as `<hex>  <path>`.
    ///
    /// Both supported algorithms produce 256-bit digests.
    pub fn parse(output: &str) -> Option<Self> {
        HEX_WORD
            .find(output)
            .map(|m| Self(m.as_str().to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match Self::parse(trimmed) {
            Some(d) if d.0.len() == trimmed.len() => Ok(d),
            _ => Err(format!("not a 256-bit hex digest: {trimmed}")),
        }
    }
}

/// Digest of a resource that may not exist.
///
/// `Absent` never equals any `Present` digest, including that of empty
/// content, and two absent resources compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Absent,
    Present(Digest),
}

impl Fingerprint {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Self::Absent => None,
            Self::Present(d) => Some(d),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("<absent>"),
            Self::Present(d) => d.fmt(f),
        }
    }
}

/// Hash everything `reader` yields, one block at a time
pub fn digest_reader<R: Read>(algorithm: DigestAlgorithm, reader: &mut R) -> io::Result<Digest> {
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; BLOCK_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash an in-memory buffer
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Digest {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize()
}

/// Hash a local file; a missing file is [`Fingerprint::Absent`]
pub fn digest_file(algorithm: DigestAlgorithm, path: &Path) -> io::Result<Fingerprint> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Fingerprint::Absent),
        Err(e) => return Err(e),
    };
    Ok(Fingerprint::Present(digest_reader(algorithm, &mut file)?))
}
