//! # shellexec
//!
//! Run shell commands on a target machine, locally or over ssh, with the
//! target described by an explicit [`ExecContext`] value.
//!
//! ## Core Concepts
//!
//! - **ExecContext**: host, login user, elevation and working directory
//! - **ShellCommand**: a command line whose arguments are always quoted
//! - **Executor**: the transport (run, run elevated, upload, download)
//!
//! ## Example
//!
//! ```no_run
//! use shellexec::{ExecContext, Executor, LocalExecutor, ShellCommand};
//!
//! let exec = LocalExecutor::new();
//! let ctx = ExecContext::local().in_dir("/var/log");
//! let out = exec.run(&ctx, &ShellCommand::new("ls").arg("-1"))?;
//! println!("{}", out.stdout);
//! # Ok::<(), shellexec::Error>(())
//! ```
//!
//! Executors never retry and never time out on their own; a hung command
//! blocks the caller.

pub mod command;
pub mod context;
pub mod error;
pub mod executor;
pub mod local;
pub mod recording;
pub mod ssh;

pub use command::{ShellCommand, quote};
pub use context::ExecContext;
pub use error::{Error, Result};
pub use executor::{CommandOutput, Executor, ensure_success, fetch_command};
pub use local::LocalExecutor;
pub use recording::{Invocation, RecordingExecutor};
pub use ssh::{SshExecutor, SshOptions};
