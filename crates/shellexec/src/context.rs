//! Execution context
//!
//! An [`ExecContext`] names the target of a command: which host, which login
//! user, whether to elevate and as whom, and which working directory. It is a
//! plain value passed to every executor call, so nothing about the current
//! target lives in process-wide state.

use crate::command::ShellCommand;

/// Where and as whom a command runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// Target host (`None` for the local machine)
    pub host: Option<String>,
    /// Login user on the target (`None` for the transport default)
    pub user: Option<String>,
    /// Elevate every command, not only the ones that ask for it
    pub sudo: bool,
    /// Account to impersonate when elevating (`None` for root)
    pub sudo_user: Option<String>,
    /// Working directory commands run in
    pub cwd: Option<String>,
}

impl ExecContext {
    /// Context for the local machine
    pub fn local() -> Self {
        Self::default()
    }

    /// Context for a remote host
    pub fn remote(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Log in as `user`
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Elevate every command
    pub fn elevated(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Impersonate `user` when elevating
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.sudo_user = Some(user.into());
        self
    }

    /// A child context whose commands run inside `dir`.
    ///
    /// Relative directories are resolved against the current working
    /// directory of this context. The parent context is left untouched, so
    /// the scope ends when the child is dropped.
    pub fn in_dir(&self, dir: &str) -> Self {
        let cwd = match (&self.cwd, dir.starts_with('/')) {
            (Some(base), false) => format!("{}/{}", base.trim_end_matches('/'), dir),
            _ => dir.to_string(),
        };
        Self {
            cwd: Some(cwd),
            ..self.clone()
        }
    }

    /// Whether commands run on the local machine
    pub fn is_local(&self) -> bool {
        self.host.is_none()
    }

    /// `user@host` (or just `host`) for ssh-style transports
    pub fn destination(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        Some(match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        })
    }

    /// The script that runs `command` in this context's working directory.
    ///
    /// The command is grouped so that its own `||`/`;` operators cannot run
    /// when the `cd` fails.
    pub fn script(&self, command: &ShellCommand) -> String {
        match &self.cwd {
            Some(dir) => format!("{} && {{ {}; }}", ShellCommand::new("cd").arg(dir), command),
            None => command.render(),
        }
    }

    /// Wrap a script so that it runs elevated, optionally as `as_user`.
    ///
    /// `sudo -n` never prompts: elevation must be passwordless or already
    /// validated for the session.
    pub fn privileged_script(script: &str, as_user: Option<&str>) -> String {
        let mut cmd = ShellCommand::new("sudo").arg("-n").arg("-H");
        if let Some(user) = as_user {
            cmd = cmd.arg("-u").arg(user);
        }
        cmd.args(["--", "sh", "-c", script]).render()
    }
}
