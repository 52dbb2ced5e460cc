//! Read-only state queries against a target
//!
//! Probes run before anything is known about the path, so a missing path is
//! an ordinary answer (`false`, `None`, [`Fingerprint::Absent`]), signalled by
//! a reserved exit status of the probe script. Anything else that goes wrong
//! (the executor failing to reach the host, a tool exiting with an unexpected
//! status, unparsable output) is an error.

use crate::digest::{Digest, Fingerprint};
use crate::error::{Error, Result};
use crate::target::Target;
use shellexec::{CommandOutput, ShellCommand};

/// Exit status probe scripts use to report that the path does not exist
pub(crate) const EXIT_ABSENT: i32 = 3;

/// Ownership and permission bits of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub owner: String,
    pub group: String,
    /// Octal permission bits as printed by `stat` (e.g. `644`)
    pub mode: String,
}

/// Everything a probe can tell about one path, captured at one moment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileSnapshot {
    pub exists: bool,
    /// Content digest; `Absent` for missing paths and non-regular files
    pub fingerprint: Fingerprint,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<String>,
}

impl RemoteFileSnapshot {
    pub fn absent() -> Self {
        Self {
            exists: false,
            fingerprint: Fingerprint::Absent,
            owner: None,
            group: None,
            mode: None,
        }
    }
}

fn unexpected(path: &str, output: &CommandOutput) -> Error {
    Error::Probe {
        path: path.to_string(),
        detail: format!(
            "exit code {}: {}",
            output.exit_code,
            output.stderr.trim()
        ),
    }
}

/// Run `test <flag> <path>`, answering with 0 or [`EXIT_ABSENT`].
///
/// Any other status (a refused `sudo` exits 1) is an error, never "false".
fn test_path(target: &Target<'_>, flag: &str, path: &str, use_sudo: bool) -> Result<bool> {
    let cmd = ShellCommand::branch(
        ShellCommand::new("test").arg(flag).arg(path),
        ShellCommand::exit(0),
        ShellCommand::exit(EXIT_ABSENT),
    );
    let output = target.run(&cmd, use_sudo)?;
    match output.exit_code {
        0 => Ok(true),
        EXIT_ABSENT => Ok(false),
        _ => Err(unexpected(path, &output)),
    }
}

/// Whether anything (including a dangling symlink) exists at `path`
pub fn exists(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<bool> {
    Ok(test_path(target, "-e", path, use_sudo)? || test_path(target, "-L", path, use_sudo)?)
}

/// Whether `path` is a regular file (following symlinks)
pub fn is_file(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<bool> {
    test_path(target, "-f", path, use_sudo)
}

/// Whether `path` is a directory (following symlinks)
pub fn is_dir(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<bool> {
    test_path(target, "-d", path, use_sudo)
}

/// Whether `path` is a symlink
pub fn is_link(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<bool> {
    test_path(target, "-L", path, use_sudo)
}

/// Content digest of `path`, or `Absent` if it does not exist
pub fn digest_of(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<Fingerprint> {
    let cmd = ShellCommand::new("test")
        .args(["-e", path])
        .or(ShellCommand::exit(EXIT_ABSENT))
        .then(target.algorithm().remote_command(path));
    let output = target.run(&cmd, use_sudo)?;

    match output.exit_code {
        0 => Digest::parse(&output.stdout)
            .map(Fingerprint::Present)
            .ok_or_else(|| Error::Probe {
                path: path.to_string(),
                detail: format!("no digest in output: {}", output.stdout.trim()),
            }),
        EXIT_ABSENT => Ok(Fingerprint::Absent),
        _ => Err(unexpected(path, &output)),
    }
}

/// Owner, group and mode of `path`, or `None` if it does not exist
pub fn metadata(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<Option<Metadata>> {
    let cmd = ShellCommand::new("test")
        .args(["-e", path])
        .or(ShellCommand::new("test").args(["-L", path]))
        .or(ShellCommand::exit(EXIT_ABSENT))
        .then(ShellCommand::new("stat").args(["-c", "%U %G %a", "--", path]));
    let output = target.run(&cmd, use_sudo)?;

    match output.exit_code {
        0 => {
            let fields: Vec<&str> = output.stdout.split_whitespace().collect();
            match fields.as_slice() {
                [owner, group, mode] => Ok(Some(Metadata {
                    owner: (*owner).to_string(),
                    group: (*group).to_string(),
                    mode: (*mode).to_string(),
                })),
                _ => Err(Error::Probe {
                    path: path.to_string(),
                    detail: format!("unexpected stat output: {}", output.stdout.trim()),
                }),
            }
        }
        EXIT_ABSENT => Ok(None),
        _ => Err(unexpected(path, &output)),
    }
}

pub fn owner_of(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<Option<String>> {
    Ok(metadata(target, path, use_sudo)?.map(|m| m.owner))
}

pub fn group_of(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<Option<String>> {
    Ok(metadata(target, path, use_sudo)?.map(|m| m.group))
}

pub fn mode_of(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<Option<String>> {
    Ok(metadata(target, path, use_sudo)?.map(|m| m.mode))
}

/// Where the symlink at `path` points, or `None` if `path` is not a symlink
pub fn link_target(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<Option<String>> {
    let cmd = ShellCommand::new("test")
        .args(["-L", path])
        .or(ShellCommand::exit(EXIT_ABSENT))
        .then(ShellCommand::new("readlink").arg("--").arg(path));
    let output = target.run(&cmd, use_sudo)?;

    match output.exit_code {
        0 => Ok(Some(output.stdout.trim_end_matches('\n').to_string())),
        EXIT_ABSENT => Ok(None),
        _ => Err(unexpected(path, &output)),
    }
}

/// Probe existence, content and metadata of `path` in one go
pub fn snapshot(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<RemoteFileSnapshot> {
    let Some(meta) = metadata(target, path, use_sudo)? else {
        return Ok(RemoteFileSnapshot::absent());
    };

    let fingerprint = if is_file(target, path, use_sudo)? {
        digest_of(target, path, use_sudo)?
    } else {
        Fingerprint::Absent
    };

    Ok(RemoteFileSnapshot {
        exists: true,
        fingerprint,
        owner: Some(meta.owner),
        group: Some(meta.group),
        mode: Some(meta.mode),
    })
}
