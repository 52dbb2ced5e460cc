//! Error types for idem

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a delimited document was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// A begin marker with no end marker after it
    MissingEnd,
    /// An end marker with no begin marker before it
    MissingBegin,
    /// A second begin marker before the first block was closed
    NestedBegin,
    /// More than one complete block with the same name
    DuplicateBlock,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingEnd => "begin marker without matching end marker",
            Self::MissingBegin => "end marker without matching begin marker",
            Self::NestedBegin => "begin marker inside an open block",
            Self::DuplicateBlock => "more than one block with this name",
        };
        f.write_str(text)
    }
}

/// Errors that can occur while probing or converging a target
#[derive(Error, Debug)]
pub enum Error {
    /// The executor could not run a command or move bytes
    #[error(transparent)]
    Exec(#[from] shellexec::Error),

    /// Begin/end markers in a delimited document do not pair up
    #[error("corrupted document: {reason} for entry `{name}` at line {line}")]
    CorruptedDocument {
        name: String,
        line: usize,
        reason: Corruption,
    },

    /// The desired state is empty, ambiguous or malformed
    #[error("invalid desired state: {0}")]
    Usage(String),

    /// Something already at the path blocks convergence (e.g. a file where a
    /// directory is wanted)
    #[error("{path}: {detail}")]
    Conflict { path: String, detail: String },

    /// A probe ran but its result could not be interpreted
    #[error("probe of {path} failed: {detail}")]
    Probe { path: String, detail: String },

    /// Fetched content did not match the digest it was declared with
    #[error("digest mismatch for {path}: expected {expected}, found {actual}")]
    Verification {
        path: String,
        expected: String,
        actual: String,
    },

    /// A watch callback failed
    #[error("change callback failed: {0}")]
    Callback(#[source] anyhow::Error),

    /// Target configuration could not be parsed
    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a connectivity failure of the executor
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Exec(e) if e.is_connectivity())
    }
}

/// Result type for idem operations
pub type Result<T> = std::result::Result<T, Error>;
