//! Recording executor - logs every invocation before delegating.
//!
//! Useful for auditing what a convergence run actually did, and for tests
//! that assert on the number of uploads or the exact commands issued.

use crate::command::ShellCommand;
use crate::context::ExecContext;
use crate::error::Result;
use crate::executor::{CommandOutput, Executor};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// One call made through a [`RecordingExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run {
        command: String,
        privileged: bool,
        as_user: Option<String>,
    },
    Upload {
        local: PathBuf,
        remote: String,
        privileged: bool,
    },
    Download {
        url: String,
        destination: String,
        privileged: bool,
    },
}

/// Wraps another executor and records every call, in order.
#[derive(Debug)]
pub struct RecordingExecutor<E> {
    inner: E,
    log: Mutex<Vec<Invocation>>,
}

impl<E: Executor> RecordingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped executor
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// All invocations so far
    pub fn invocations(&self) -> Vec<Invocation> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rendered command lines of every `run`/`run_privileged` call
    pub fn commands(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter_map(|inv| match inv {
                Invocation::Run { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Number of uploads performed
    pub fn upload_count(&self) -> usize {
        self.count(|inv| matches!(inv, Invocation::Upload { .. }))
    }

    /// Number of downloads performed
    pub fn download_count(&self) -> usize {
        self.count(|inv| matches!(inv, Invocation::Download { .. }))
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn count(&self, predicate: impl Fn(&Invocation) -> bool) -> usize {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|inv| predicate(inv))
            .count()
    }

    fn record(&self, invocation: Invocation) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation);
    }
}

impl<E: Executor> Executor for RecordingExecutor<E> {
    fn run(&self, ctx: &ExecContext, command: &ShellCommand) -> Result<CommandOutput> {
        self.record(Invocation::Run {
            command: command.render(),
            privileged: ctx.sudo,
            as_user: ctx.sudo_user.clone(),
        });
        self.inner.run(ctx, command)
    }

    fn run_privileged(
        &self,
        ctx: &ExecContext,
        command: &ShellCommand,
        as_user: Option<&str>,
    ) -> Result<CommandOutput> {
        self.record(Invocation::Run {
            command: command.render(),
            privileged: true,
            as_user: as_user.map(str::to_string),
        });
        self.inner.run_privileged(ctx, command, as_user)
    }

    fn upload(
        &self,
        ctx: &ExecContext,
        local: &Path,
        remote: &str,
        privileged: bool,
    ) -> Result<()> {
        self.record(Invocation::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            privileged,
        });
        self.inner.upload(ctx, local, remote, privileged)
    }

    fn download(
        &self,
        ctx: &ExecContext,
        url: &str,
        destination: &str,
        privileged: bool,
    ) -> Result<()> {
        self.record(Invocation::Download {
            url: url.to_string(),
            destination: destination.to_string(),
            privileged,
        });
        self.inner.download(ctx, url, destination, privileged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalExecutor;

    #[test]
    fn test_records_in_order() {
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let ctx = ExecContext::local();

        exec.run(&ctx, &ShellCommand::new("true")).unwrap();
        exec.run(&ctx, &ShellCommand::new("echo").arg("a b")).unwrap();

        assert_eq!(exec.commands(), vec!["true", "echo 'a b'"]);
        assert_eq!(exec.upload_count(), 0);

        exec.clear();
        assert!(exec.invocations().is_empty());
    }

    #[test]
    fn test_records_failed_uploads_too() {
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let result = exec.upload(
            &ExecContext::local(),
            Path::new("/definitely/missing/source"),
            "/tmp/never-written",
            false,
        );
        assert!(result.is_err());
        assert_eq!(exec.upload_count(), 1);
    }
}
