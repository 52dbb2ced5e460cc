//! Executor trait and command output
//!
//! The [`Executor`] trait is the narrow interface everything above this crate
//! consumes: run a command, run it elevated, move bytes to the target. It
//! abstracts the transport, enabling:
//! - Local execution via `sh -c`
//! - Remote execution via `ssh`
//! - Recording wrappers for auditing and tests

use crate::command::ShellCommand;
use crate::context::ExecContext;
use crate::error::{Error, Result};
use std::path::Path;
use std::process::{Command, Output};

/// Output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status (`-1` if the process was killed by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Stdout with surrounding whitespace removed
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Transport for running commands on a target.
pub trait Executor: Send + Sync {
    /// Run a command as the session identity.
    ///
    /// A non-zero exit status is returned in the output, not raised. Errors
    /// are reserved for failing to run the command at all.
    fn run(&self, ctx: &ExecContext, command: &ShellCommand) -> Result<CommandOutput>;

    /// Run a command with elevated privileges, optionally as `as_user`.
    fn run_privileged(
        &self,
        ctx: &ExecContext,
        command: &ShellCommand,
        as_user: Option<&str>,
    ) -> Result<CommandOutput>;

    /// Copy a local file to `remote` on the target.
    fn upload(&self, ctx: &ExecContext, local: &Path, remote: &str, privileged: bool)
    -> Result<()>;

    /// Fetch `url` directly into `destination` on the target.
    ///
    /// The bytes land in a scratch file next to `destination` that is moved
    /// into place only once the fetch succeeded, so a failed fetch never
    /// leaves a partial file at `destination`.
    fn download(
        &self,
        ctx: &ExecContext,
        url: &str,
        destination: &str,
        privileged: bool,
    ) -> Result<()> {
        let exec = |command: &ShellCommand| {
            if privileged {
                self.run_privileged(ctx, command, ctx.sudo_user.as_deref())
            } else {
                self.run(ctx, command)
            }
        };
        let failed = |stderr: &str| Error::Download {
            url: url.to_string(),
            destination: destination.to_string(),
            stderr: stderr.trim().to_string(),
        };

        let mktemp = ShellCommand::new("mktemp").arg(format!("{destination}.XXXXXX"));
        let scratch = exec(&mktemp)?;
        if !scratch.success {
            return Err(failed(&scratch.stderr));
        }
        let partial = scratch.stdout_trimmed().to_string();

        let fetched = exec(&fetch_command(url, &partial));
        if matches!(&fetched, Ok(out) if out.success) {
            let install = ShellCommand::new("mv").args(["-f", "--", partial.as_str(), destination]);
            let moved = exec(&install)?;
            if !moved.success {
                return Err(failed(&moved.stderr));
            }
            return Ok(());
        }

        let cleanup = ShellCommand::new("rm").args(["-f", "--", partial.as_str()]);
        match exec(&cleanup) {
            Ok(out) if out.success => {}
            Ok(out) => log::warn!("Failed to remove {partial}: {}", out.stderr.trim()),
            Err(e) => log::warn!("Failed to remove {partial}: {e}"),
        }
        Err(fetched.map_or_else(|e| e, |out| failed(&out.stderr)))
    }

    /// Run a command and fail unless it exits zero
    fn run_checked(&self, ctx: &ExecContext, command: &ShellCommand) -> Result<CommandOutput> {
        ensure_success(command, self.run(ctx, command)?)
    }

    /// Run an elevated command and fail unless it exits zero
    fn run_privileged_checked(
        &self,
        ctx: &ExecContext,
        command: &ShellCommand,
        as_user: Option<&str>,
    ) -> Result<CommandOutput> {
        ensure_success(command, self.run_privileged(ctx, command, as_user)?)
    }
}

/// Turn a non-zero exit into [`Error::CommandFailed`]
pub fn ensure_success(command: &ShellCommand, output: CommandOutput) -> Result<CommandOutput> {
    if output.success {
        return Ok(output);
    }
    Err(Error::CommandFailed {
        command: command.render(),
        exit_code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    })
}

/// The command that fetches a URL on the target: curl when installed,
/// otherwise wget. A failing curl does not fall back to wget.
pub fn fetch_command(url: &str, destination: &str) -> ShellCommand {
    ShellCommand::branch(
        ShellCommand::new("command").args(["-v", "curl"]).stdout_null(),
        ShellCommand::new("curl").args(["-fsSL", "-o", destination, "--", url]),
        ShellCommand::new("wget").args(["-q", "-O", destination, "--", url]),
    )
}

/// Spawn a local helper process and capture its output
pub(crate) fn capture(command: &mut Command) -> Result<CommandOutput> {
    let program = command.get_program().to_string_lossy().to_string();
    let output = command
        .output()
        .map_err(|source| Error::Spawn { program, source })?;
    Ok(output.into())
}
