//! Local executor - runs commands on this machine through `sh -c`
//!
//! Uploads stream the local file into `cat > <path>`, the same way the ssh
//! executor does.

use crate::command::ShellCommand;
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::executor::{CommandOutput, Executor, capture};
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

/// Executor for the local machine.
///
/// The context's `host` and `user` are ignored; `cwd`, `sudo` and
/// `sudo_user` apply as usual.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: String,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell binary
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Whether this process already runs as root
    #[allow(unsafe_code)]
    pub fn is_root() -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    /// Validate sudo credentials up front, prompting the user if needed.
    ///
    /// Elevated commands run with `sudo -n` and cannot prompt, so interactive
    /// callers validate once before converging.
    pub fn validate_sudo(reason: &str) -> Result<()> {
        log::info!("Sudo required: {reason}");
        let status = Command::new("sudo")
            .arg("-v")
            .status()
            .map_err(|source| Error::Spawn {
                program: "sudo".to_string(),
                source,
            })?;

        if !status.success() {
            return Err(Error::CommandFailed {
                command: "sudo -v".to_string(),
                exit_code: status.code().unwrap_or(-1),
                stderr: "failed to acquire sudo privileges".to_string(),
            });
        }
        Ok(())
    }

    fn shell(&self, script: &str, stdin: Option<File>) -> Result<CommandOutput> {
        log::debug!("local: {script}");
        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(script);
        if let Some(file) = stdin {
            command.stdin(Stdio::from(file));
        }
        capture(&mut command)
    }

    /// The script for `command`, wrapped in sudo unless elevation is a no-op
    fn script_for(ctx: &ExecContext, command: &ShellCommand, as_user: Option<&str>) -> String {
        let script = ctx.script(command);
        if as_user.is_none() && Self::is_root() {
            return script;
        }
        ExecContext::privileged_script(&script, as_user)
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for LocalExecutor {
    fn run(&self, ctx: &ExecContext, command: &ShellCommand) -> Result<CommandOutput> {
        if ctx.sudo {
            return self.run_privileged(ctx, command, ctx.sudo_user.as_deref());
        }
        self.shell(&ctx.script(command), None)
    }

    fn run_privileged(
        &self,
        ctx: &ExecContext,
        command: &ShellCommand,
        as_user: Option<&str>,
    ) -> Result<CommandOutput> {
        self.shell(&Self::script_for(ctx, command, as_user), None)
    }

    fn upload(
        &self,
        ctx: &ExecContext,
        local: &Path,
        remote: &str,
        privileged: bool,
    ) -> Result<()> {
        // The elevated side only reads stdin; it never opens `local`.
        let file = File::open(local)?;
        let write = ShellCommand::new("cat").write_to(remote);
        let script = if privileged || ctx.sudo {
            Self::script_for(ctx, &write, ctx.sudo_user.as_deref())
        } else {
            ctx.script(&write)
        };

        let output = self.shell(&script, Some(file))?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::quote;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(path: &Path, body: &str) {
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A `LocalExecutor` whose shell resolves `sudo` to `sudo_script`
    fn executor_with_sudo(dir: &Path, sudo_script: &str) -> LocalExecutor {
        let bin = dir.join("bin");
        fs::create_dir(&bin).unwrap();
        write_script(&bin.join("sudo"), sudo_script);

        let shell = dir.join("shell");
        write_script(
            &shell,
            &format!(
                "#!/bin/sh\nPATH={}:\"$PATH\"\nexport PATH\nexec sh \"$@\"\n",
                quote(&bin.to_string_lossy())
            ),
        );
        LocalExecutor::with_shell(shell.to_string_lossy())
    }

    #[test]
    fn test_run_captures_output_and_status() {
        let exec = LocalExecutor::new();
        let ctx = ExecContext::local();

        let out = exec
            .run(&ctx, &ShellCommand::new("echo").arg("hello world"))
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout_trimmed(), "hello world");

        let out = exec
            .run(&ctx, &ShellCommand::new("sh").args(["-c", "echo oops >&2; exit 7"]))
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, 7);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn test_run_checked_raises_on_failure() {
        let exec = LocalExecutor::new();
        let err = exec
            .run_checked(&ExecContext::local(), &ShellCommand::new("false"))
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: 1, .. }));
    }

    #[test]
    fn test_run_in_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("marker file"), "x").unwrap();

        let exec = LocalExecutor::new();
        let ctx = ExecContext::local().in_dir(&dir.path().to_string_lossy());
        let out = exec
            .run_checked(&ctx, &ShellCommand::new("ls"))
            .unwrap();
        assert_eq!(out.stdout_trimmed(), "marker file");
    }

    #[test]
    fn test_quoted_arguments_reach_program_verbatim() {
        let exec = LocalExecutor::new();
        let tricky = "it's $HOME; `id`";
        let out = exec
            .run_checked(
                &ExecContext::local(),
                &ShellCommand::new("printf").arg("%s").arg(tricky),
            )
            .unwrap();
        assert_eq!(out.stdout, tricky);
    }

    #[test]
    fn test_upload_copies_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, "payload").unwrap();

        let exec = LocalExecutor::new();
        exec.upload(&ExecContext::local(), &src, &dst.to_string_lossy(), false)
            .unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "payload");
    }

    #[test]
    fn test_upload_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, "payload").unwrap();
        let dst = dir.path().join("missing-dir").join("dst.txt");

        let exec = LocalExecutor::new();
        let err = exec
            .upload(&ExecContext::local(), &src, &dst.to_string_lossy(), false)
            .unwrap_err();
        assert!(matches!(err, Error::Upload { .. }));
    }

    #[test]
    fn test_failing_branch_does_not_fall_through() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let cmd = ShellCommand::branch(
            ShellCommand::new("true"),
            ShellCommand::new("false"),
            ShellCommand::new("touch").arg(marker.to_string_lossy()),
        );

        let out = LocalExecutor::new().run(&ExecContext::local(), &cmd).unwrap();
        assert!(!out.success);
        assert!(!marker.exists());
    }

    #[test]
    fn test_failed_download_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("pkg.tgz");

        let exec = LocalExecutor::new();
        let err = exec
            .download(
                &ExecContext::local(),
                "http://127.0.0.1:9/pkg.tgz",
                &dst.to_string_lossy(),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Download { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_download_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("pkg.tgz");
        fs::write(&dst, "previous release").unwrap();

        let exec = LocalExecutor::new();
        assert!(
            exec.download(
                &ExecContext::local(),
                "http://127.0.0.1:9/pkg.tgz",
                &dst.to_string_lossy(),
                false,
            )
            .is_err()
        );
        assert_eq!(fs::read_to_string(&dst).unwrap(), "previous release");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_elevated_upload_streams_private_file() {
        let dir = TempDir::new().unwrap();
        let argv = dir.path().join("argv");
        let exec = executor_with_sudo(
            dir.path(),
            &format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > {}\n\
                 while [ \"$#\" -gt 0 ] && [ \"$1\" != -- ]; do shift; done\n\
                 shift\nexec \"$@\"\n",
                quote(&argv.to_string_lossy())
            ),
        );

        let src = dir.path().join("staged");
        fs::write(&src, "0 3 * * * backup\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o600)).unwrap();
        let dst = dir.path().join("installed");

        let ctx = ExecContext::local().as_user("nobody");
        exec.upload(&ctx, &src, &dst.to_string_lossy(), true).unwrap();

        assert_eq!(fs::read_to_string(&dst).unwrap(), "0 3 * * * backup\n");
        let args = fs::read_to_string(&argv).unwrap();
        assert!(args.lines().any(|a| a == "nobody"));
        assert!(!args.contains(&*src.to_string_lossy()));
    }
}
