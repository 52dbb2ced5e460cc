//! Remote executor over the OpenSSH client
//!
//! Every command is sent as a single `sh -c '<script>'` argument so the
//! remote login shell only ever sees one quoted word. Uploads stream the
//! local file into `cat > <path>` on the target, which needs nothing beyond
//! a POSIX shell on the remote side and lets elevated uploads go through the
//! same `sudo` wrapping as any other command.

use crate::command::ShellCommand;
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::executor::{CommandOutput, Executor, capture};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Exit status the OpenSSH client uses for its own failures
const SSH_FAILURE_EXIT: i32 = 255;

/// Connection options for [`SshExecutor`]
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    /// Seconds to wait for the TCP connection
    pub connect_timeout: Option<u64>,
    /// Extra `-o` options, e.g. `StrictHostKeyChecking=accept-new`
    pub options: Vec<String>,
    /// Never prompt for passwords or host keys
    pub batch_mode: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            port: None,
            identity_file: None,
            connect_timeout: None,
            options: Vec::new(),
            batch_mode: true,
        }
    }
}

/// Executor that runs commands through the `ssh` binary.
///
/// The host and login user come from the [`ExecContext`] of each call.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    options: SshOptions,
    program: String,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self {
            options,
            program: "ssh".to_string(),
        }
    }

    /// Use a different ssh client binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments for running `script` on the context's host
    pub fn ssh_args(&self, ctx: &ExecContext, script: &str) -> Result<Vec<String>> {
        let destination = ctx.destination().ok_or(Error::MissingHost)?;

        let mut args = Vec::new();
        if let Some(port) = self.options.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        if self.options.batch_mode {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        if let Some(timeout) = self.options.connect_timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={timeout}"));
        }
        for option in &self.options.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        args.push(destination);
        args.push("--".to_string());
        args.push(ShellCommand::new("sh").arg("-c").arg(script).render());
        Ok(args)
    }

    fn script_for(
        ctx: &ExecContext,
        command: &ShellCommand,
        privileged: bool,
        as_user: Option<&str>,
    ) -> String {
        let script = ctx.script(command);
        if privileged {
            ExecContext::privileged_script(&script, as_user)
        } else {
            script
        }
    }

    fn ssh(&self, ctx: &ExecContext, script: &str, stdin: Option<File>) -> Result<CommandOutput> {
        let args = self.ssh_args(ctx, script)?;
        log::debug!(
            "ssh {}: {script}",
            ctx.destination().unwrap_or_default()
        );

        let mut command = Command::new(&self.program);
        command.args(&args);
        if let Some(file) = stdin {
            command.stdin(Stdio::from(file));
        }

        let output = capture(&mut command)?;
        if output.exit_code == SSH_FAILURE_EXIT {
            return Err(Error::Connection {
                host: ctx.host.clone().unwrap_or_default(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Executor for SshExecutor {
    fn run(&self, ctx: &ExecContext, command: &ShellCommand) -> Result<CommandOutput> {
        let script = Self::script_for(ctx, command, ctx.sudo, ctx.sudo_user.as_deref());
        self.ssh(ctx, &script, None)
    }

    fn run_privileged(
        &self,
        ctx: &ExecContext,
        command: &ShellCommand,
        as_user: Option<&str>,
    ) -> Result<CommandOutput> {
        let script = Self::script_for(ctx, command, true, as_user);
        self.ssh(ctx, &script, None)
    }

    fn upload(
        &self,
        ctx: &ExecContext,
        local: &Path,
        remote: &str,
        privileged: bool,
    ) -> Result<()> {
        let file = File::open(local)?;
        let write = ShellCommand::new("cat").write_to(remote);
        let script = Self::script_for(
            ctx,
            &write,
            privileged || ctx.sudo,
            ctx.sudo_user.as_deref(),
        );

        let output = self.ssh(ctx, &script, Some(file))?;
        if !output.success {
            return Err(Error::Upload {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
