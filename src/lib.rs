//! # idem
//!
//! Idempotent administration helpers for remote (or local) machines.
//!
//! Every operation follows the same shape: probe the target, compare with
//! the desired state, apply the smallest change that closes the gap, then
//! verify. Calling an operation twice in a row changes nothing the second
//! time.
//!
//! ## Core Concepts
//!
//! - **Target**: an executor plus the [`shellexec::ExecContext`] it acts in
//! - **Probe**: a read-only query; absence is an answer, not an error
//! - **DesiredFileState**: what one file should contain and who owns it
//! - **Watch**: a before/after fingerprint bracketing a block of work
//! - **CronDocument**: named blocks inside a crontab
//! - **Resource**: the common interface of every desired-state type
//!
//! ## Example
//!
//! ```no_run
//! use idem::files::{DesiredFileState, ensure_file};
//! use idem::TargetConfig;
//!
//! # fn main() -> idem::Result<()> {
//! idem::logging::init(1, false);
//!
//! let config = TargetConfig::load_default()?;
//! let executor = config.executor();
//! let target = config.target(executor.as_ref());
//!
//! let motd = DesiredFileState::new("/etc/motd")
//!     .contents("Managed host, changes will be overwritten\n")
//!     .owner("root")
//!     .mode("644")
//!     .sudo(true);
//! ensure_file(&target, &motd)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crontab;
pub mod digest;
pub mod error;
pub mod files;
pub mod logging;
pub mod probe;
pub mod resource;
pub mod target;
pub mod watch;

pub use config::TargetConfig;
pub use crontab::{CronDocument, CronEntry, Crontab, CrontabLocation};
pub use digest::{Digest, DigestAlgorithm, Fingerprint};
pub use error::{Corruption, Error, Result};
pub use files::{
    ContentSource, DesiredDirectory, DesiredFileState, DesiredSymlink, ensure_directory,
    ensure_file, ensure_symlink, remove_path,
};
pub use resource::{
    ApplyResult, ApplySummary, Resource, ResourceDiff, ResourceState, apply_all, compute_diffs,
};
pub use target::Target;
pub use watch::{Watch, Watched, watch};

pub use shellexec;
