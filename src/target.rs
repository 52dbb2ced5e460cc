//! A target machine: an executor plus the context its commands run in

use crate::digest::DigestAlgorithm;
use crate::error::Result;
use shellexec::{CommandOutput, ExecContext, Executor, ShellCommand};
use std::path::Path;

/// Everything a probe or convergence call needs to reach one machine.
///
/// Cheap to clone; scoping (`in_dir`) returns a new target and leaves this
/// one untouched.
#[derive(Clone)]
pub struct Target<'a> {
    executor: &'a dyn Executor,
    context: ExecContext,
    algorithm: DigestAlgorithm,
}

impl<'a> Target<'a> {
    pub fn new(executor: &'a dyn Executor, context: ExecContext) -> Self {
        Self {
            executor,
            context,
            algorithm: DigestAlgorithm::default(),
        }
    }

    /// Use `algorithm` for local and remote content digests
    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }

    pub fn context(&self) -> &ExecContext {
        &self.context
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// A target whose commands run inside `dir`
    pub fn in_dir(&self, dir: &str) -> Self {
        Self {
            context: self.context.in_dir(dir),
            ..self.clone()
        }
    }

    /// Run a command, elevated if `use_sudo` (warn-only: non-zero exits are returned)
    pub fn run(&self, command: &ShellCommand, use_sudo: bool) -> Result<CommandOutput> {
        let output = if use_sudo {
            self.executor.run_privileged(
                &self.context,
                command,
                self.context.sudo_user.as_deref(),
            )?
        } else {
            self.executor.run(&self.context, command)?
        };
        Ok(output)
    }

    /// Run a command and fail unless it exits zero
    pub fn run_checked(&self, command: &ShellCommand, use_sudo: bool) -> Result<CommandOutput> {
        let output = self.run(command, use_sudo)?;
        Ok(shellexec::ensure_success(command, output)?)
    }

    pub fn upload(&self, local: &Path, remote: &str, use_sudo: bool) -> Result<()> {
        log::info!("Uploading {} to {remote}", local.display());
        self.executor
            .upload(&self.context, local, remote, use_sudo)?;
        Ok(())
    }

    pub fn download(&self, url: &str, destination: &str, use_sudo: bool) -> Result<()> {
        log::info!("Fetching {url} into {destination}");
        self.executor
            .download(&self.context, url, destination, use_sudo)?;
        Ok(())
    }
}

impl std::fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("context", &self.context)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
