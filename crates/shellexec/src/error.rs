//! Error types for command execution.
//!
//! Every variant describes a failure of the transport or of a command the
//! caller required to succeed. A command that merely exits non-zero under
//! [`Executor::run`](crate::Executor::run) is not an error.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while executing commands on a target.
#[derive(Error, Debug)]
pub enum Error {
    /// The local helper process (`sh`, `ssh`, `scp`, `sudo`) could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The ssh transport reported a connection failure (exit status 255)
    #[error("connection to {host} failed: {stderr}")]
    Connection { host: String, stderr: String },

    /// A command that was required to succeed exited non-zero
    #[error("command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Copying a local file to the target failed
    #[error("upload of {} to {remote} failed: {stderr}", .local.display())]
    Upload {
        local: PathBuf,
        remote: String,
        stderr: String,
    },

    /// Fetching a URL on the target failed
    #[error("download of {url} to {destination} failed: {stderr}")]
    Download {
        url: String,
        destination: String,
        stderr: String,
    },

    /// A remote executor was handed a context without a host
    #[error("execution context has no host")]
    MissingHost,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the failure happened before or while reaching the target,
    /// as opposed to a command running and failing there.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::Connection { .. } | Self::MissingHost
        )
    }
}

/// Result type for execution operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        let conn = Error::Connection {
            host: "web1".into(),
            stderr: "Connection refused".into(),
        };
        assert!(conn.is_connectivity());

        let failed = Error::CommandFailed {
            command: "false".into(),
            exit_code: 1,
            stderr: String::new(),
        };
        assert!(!failed.is_connectivity());
    }

    #[test]
    fn test_display_includes_command() {
        let err = Error::CommandFailed {
            command: "chmod 644 /etc/motd".into(),
            exit_code: 1,
            stderr: "Operation not permitted".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("chmod 644 /etc/motd"));
        assert!(msg.contains("exit code 1"));
    }
}
