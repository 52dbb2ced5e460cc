//! Change detection across a block of operations
//!
//! A [`Watch`] fingerprints one path, runs a block, fingerprints the path
//! again and reports whether the content changed. The typical use is
//! restarting a service only when its configuration was rewritten:
//!
//! ```no_run
//! use idem::files::{DesiredFileState, ensure_file};
//! use idem::target::Target;
//! use idem::watch::Watch;
//! use shellexec::{ExecContext, LocalExecutor, ShellCommand};
//!
//! # fn main() -> idem::Result<()> {
//! let exec = LocalExecutor::new();
//! let target = Target::new(&exec, ExecContext::local());
//! let restart = ShellCommand::new("systemctl").args(["restart", "nginx"]);
//!
//! let watched = Watch::begin(&target, "/etc/nginx/nginx.conf", true)?
//!     .on_change(|| {
//!         target.run_checked(&restart, true)?;
//!         Ok(())
//!     })
//!     .run(|| {
//!         let conf = DesiredFileState::new("/etc/nginx/nginx.conf")
//!             .source_file("nginx.conf")
//!             .sudo(true);
//!         ensure_file(&target, &conf)
//!     });
//! println!("changed: {}", watched.changed());
//! watched.into_result()?;
//! # Ok(())
//! # }
//! ```
//!
//! The after-snapshot and the callback run on every exit of the block,
//! including when it returns an error. A session that is dropped before it
//! finishes (the block panicked, or the caller returned early) is closed by
//! its destructor; failures there can only be logged.

use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use crate::probe;
use crate::target::Target;

type Callback<'t> = Box<dyn FnOnce() -> anyhow::Result<()> + 't>;

/// An open watch session on one path
#[must_use = "a watch does nothing until run or finished"]
pub struct Watch<'t> {
    target: &'t Target<'t>,
    path: String,
    use_sudo: bool,
    before: Fingerprint,
    callback: Option<Callback<'t>>,
    finished: bool,
}

impl<'t> Watch<'t> {
    /// Open a session and capture the `before` fingerprint
    pub fn begin(target: &'t Target<'t>, path: impl Into<String>, use_sudo: bool) -> Result<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(Error::Usage("no path to watch".to_string()));
        }

        let before = probe::digest_of(target, &path, use_sudo)?;
        log::debug!("Watching {path} (before: {before})");

        Ok(Self {
            target,
            path,
            use_sudo,
            before,
            callback: None,
            finished: false,
        })
    }

    /// Register a callback fired once if the path changed
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 't,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn before(&self) -> &Fingerprint {
        &self.before
    }

    /// Run `block` inside the session.
    ///
    /// Whatever the block returns, the path is probed again and the callback
    /// evaluated. An error from the block always wins over a later failure
    /// of the probe or the callback; the later failure is logged.
    pub fn run<T, E, F>(mut self, block: F) -> Watched<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let outcome = block();
        let closed = self.close();

        let result = match (outcome, closed.status) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(E::from(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(secondary)) => {
                log::warn!("After an earlier failure: {secondary}");
                Err(e)
            }
        };

        Watched {
            changed: closed.changed,
            before: closed.before,
            after: closed.after,
            result,
        }
    }

    /// Close the session without a block, returning whether the path changed
    /// since [`Watch::begin`]
    pub fn finish(mut self) -> Result<bool> {
        let closed = self.close();
        closed.status.map(|()| closed.changed)
    }

    /// Second snapshot plus callback; runs at most once per session
    fn close(&mut self) -> Closed {
        self.finished = true;
        let before = self.before.clone();

        let after = match probe::digest_of(self.target, &self.path, self.use_sudo) {
            Ok(after) => after,
            Err(e) => {
                return Closed {
                    changed: false,
                    before,
                    after: None,
                    status: Err(e),
                };
            }
        };

        let changed = after != before;
        log::debug!(
            "{}: {before} -> {after}{}",
            self.path,
            if changed { " (changed)" } else { "" }
        );

        let status = match self.callback.take() {
            Some(callback) if changed => callback().map_err(Error::Callback),
            _ => Ok(()),
        };

        Closed {
            changed,
            before,
            after: Some(after),
            status,
        }
    }
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.close().status {
            Ok(()) => log::warn!("Watch on {} dropped before finishing", self.path),
            Err(e) => log::warn!("Closing watch on {} failed: {e}", self.path),
        }
    }
}

impl std::fmt::Debug for Watch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("path", &self.path)
            .field("use_sudo", &self.use_sudo)
            .field("before", &self.before)
            .field("has_callback", &self.callback.is_some())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

struct Closed {
    changed: bool,
    before: Fingerprint,
    after: Option<Fingerprint>,
    status: Result<()>,
}

/// A closed watch session
#[derive(Debug)]
#[must_use]
pub struct Watched<T, E> {
    changed: bool,
    before: Fingerprint,
    after: Option<Fingerprint>,
    result: std::result::Result<T, E>,
}

impl<T, E> Watched<T, E> {
    /// Whether the content differs between the two snapshots. False when the
    /// path was absent both times, or when the second probe failed.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn before(&self) -> &Fingerprint {
        &self.before
    }

    /// `None` when the second probe failed
    pub fn after(&self) -> Option<&Fingerprint> {
        self.after.as_ref()
    }

    pub fn result(&self) -> &std::result::Result<T, E> {
        &self.result
    }

    pub fn into_result(self) -> std::result::Result<T, E> {
        self.result
    }
}

/// Watch `path` across `block` without a callback
pub fn watch<'t, T, E, F>(
    target: &'t Target<'t>,
    path: &str,
    use_sudo: bool,
    block: F,
) -> std::result::Result<Watched<T, E>, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: From<Error>,
{
    Ok(Watch::begin(target, path, use_sudo)?.run(block))
}
