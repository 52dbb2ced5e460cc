//! Named blocks in crontab-style documents
//!
//! Each managed entry is a block of lines fenced by marker lines derived from
//! its name:
//!
//! ```text
//! # BEGIN idem: backup
//! 0 3 * * * root /usr/local/bin/backup
//! # END idem: backup
//! ```
//!
//! Everything outside the managed blocks is preserved as-is. [`CronDocument`]
//! is the pure in-memory part; [`Crontab`] binds one to a user crontab or a
//! cron file on a target and writes it back as a whole-document replace.

use crate::error::{Corruption, Error, Result};
use crate::files::{DesiredFileState, ensure_file};
use crate::probe::EXIT_ABSENT;
use crate::resource::{ApplyResult, Resource, ResourceState};
use crate::target::Target;
use shellexec::ShellCommand;
use similar::{ChangeTag, TextDiff};
use std::fmt;
use std::io::Write;
use tempfile::NamedTempFile;

const BEGIN_PREFIX: &str = "# BEGIN idem: ";
const END_PREFIX: &str = "# END idem: ";

/// The line opening the block for `name`
pub fn begin_marker(name: &str) -> String {
    format!("{BEGIN_PREFIX}{name}")
}

/// The line closing the block for `name`
pub fn end_marker(name: &str) -> String {
    format!("{END_PREFIX}{name}")
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Usage("empty crontab entry name".to_string()));
    }
    if name.contains(['\n', '\r']) {
        return Err(Error::Usage(format!(
            "crontab entry name {name:?} spans several lines"
        )));
    }
    Ok(())
}

/// A document as an ordered list of lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronDocument {
    lines: Vec<String>,
}

impl CronDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `text` into lines. Empty text is an empty document.
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Locate the block for `name` as 0-based `(begin, end)` marker indices.
    ///
    /// Returns `Ok(None)` when no block exists. Markers that do not pair up
    /// (an unclosed begin, a stray end, a begin inside an open block, or two
    /// complete blocks) are reported as [`Error::CorruptedDocument`] with a
    /// 1-based line number.
    pub fn find_boundaries(&self, name: &str) -> Result<Option<(usize, usize)>> {
        let begin = begin_marker(name);
        let end = end_marker(name);
        let corrupted = |index: usize, reason: Corruption| Error::CorruptedDocument {
            name: name.to_string(),
            line: index + 1,
            reason,
        };

        let mut open: Option<usize> = None;
        let mut found: Option<(usize, usize)> = None;

        for (i, line) in self.lines.iter().enumerate() {
            let line = line.trim_end();
            if line == begin {
                if open.is_some() {
                    return Err(corrupted(i, Corruption::NestedBegin));
                }
                open = Some(i);
            } else if line == end {
                let Some(start) = open.take() else {
                    return Err(corrupted(i, Corruption::MissingBegin));
                };
                if found.is_some() {
                    return Err(corrupted(start, Corruption::DuplicateBlock));
                }
                found = Some((start, i));
            }
        }

        if let Some(start) = open {
            return Err(corrupted(start, Corruption::MissingEnd));
        }
        Ok(found)
    }

    pub fn has_entry(&self, name: &str) -> Result<bool> {
        Ok(self.find_boundaries(name)?.is_some())
    }

    /// Body lines of the block for `name`, markers excluded
    pub fn entry(&self, name: &str) -> Result<Option<&[String]>> {
        Ok(self
            .find_boundaries(name)?
            .map(|(begin, end)| &self.lines[begin + 1..end]))
    }

    /// Add the block for `name`, replacing any existing one.
    ///
    /// The new block always goes at the end of the document. `content` may
    /// span several lines.
    pub fn add_entry(&mut self, name: &str, content: &str) -> Result<()> {
        validate_name(name)?;
        let begin = begin_marker(name);
        let end = end_marker(name);
        if content
            .lines()
            .any(|l| l.trim_end() == begin || l.trim_end() == end)
        {
            return Err(Error::Usage(format!(
                "content of crontab entry `{name}` contains its own marker"
            )));
        }

        self.del_entry(name)?;
        self.lines.push(begin);
        self.lines.extend(content.lines().map(str::to_string));
        self.lines.push(end);
        Ok(())
    }

    /// Remove the block for `name`; returns how many blocks were removed (0 or 1)
    pub fn del_entry(&mut self, name: &str) -> Result<usize> {
        match self.find_boundaries(name)? {
            Some((begin, end)) => {
                self.lines.drain(begin..=end);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// The whole document with a trailing newline; empty when there are no lines
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

impl fmt::Display for CronDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Where a crontab lives on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrontabLocation {
    /// The crontab of a user as managed by `crontab(1)`; `None` is the
    /// executing user
    User(Option<String>),
    /// A plain cron file, e.g. `/etc/cron.d/app`
    File(String),
}

impl Default for CrontabLocation {
    fn default() -> Self {
        Self::User(None)
    }
}

impl CrontabLocation {
    fn crontab_command(user: Option<&str>) -> ShellCommand {
        let cmd = ShellCommand::new("crontab");
        match user {
            Some(user) => cmd.arg("-u").arg(user),
            None => cmd,
        }
    }
}

impl fmt::Display for CrontabLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(None) => f.write_str("crontab"),
            Self::User(Some(user)) => write!(f, "crontab of {user}"),
            Self::File(path) => f.write_str(path),
        }
    }
}

/// A [`CronDocument`] loaded from a target
#[derive(Debug, Clone)]
pub struct Crontab {
    location: CrontabLocation,
    use_sudo: bool,
    /// Text as last read or written, to skip no-op writes
    persisted: String,
    document: CronDocument,
}

impl Crontab {
    /// Load the document at `location`. A user without a crontab and a
    /// missing cron file both yield an empty document.
    pub fn read(target: &Target<'_>, location: CrontabLocation, use_sudo: bool) -> Result<Self> {
        let text = match &location {
            CrontabLocation::User(user) => {
                let cmd = CrontabLocation::crontab_command(user.as_deref()).arg("-l");
                let output = target.run(&cmd, use_sudo)?;
                if !output.success && output.stderr.contains("no crontab for") {
                    String::new()
                } else {
                    shellexec::ensure_success(&cmd, output)?.stdout
                }
            }
            CrontabLocation::File(path) => {
                if path.trim().is_empty() {
                    return Err(Error::Usage("no cron file path given".to_string()));
                }
                let cmd = ShellCommand::new("test")
                    .args(["-e", path.as_str()])
                    .or(ShellCommand::exit(EXIT_ABSENT))
                    .then(ShellCommand::new("cat").arg("--").arg(path));
                let output = target.run(&cmd, use_sudo)?;
                if output.exit_code == EXIT_ABSENT {
                    String::new()
                } else {
                    shellexec::ensure_success(&cmd, output)?.stdout
                }
            }
        };

        let document = CronDocument::parse(&text);
        log::debug!("Read {location}: {} lines", document.lines().len());
        Ok(Self {
            location,
            use_sudo,
            persisted: document.render(),
            document,
        })
    }

    pub fn location(&self) -> &CrontabLocation {
        &self.location
    }

    pub fn document(&self) -> &CronDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut CronDocument {
        &mut self.document
    }

    /// Whether the document differs from what is on the target
    pub fn is_dirty(&self) -> bool {
        self.document.render() != self.persisted
    }

    /// Replace the document on the target with the in-memory one.
    ///
    /// Nothing is written when the document is unchanged since it was read.
    pub fn write(&mut self, target: &Target<'_>) -> Result<ApplyResult> {
        let rendered = self.document.render();
        if rendered == self.persisted {
            return Ok(ApplyResult::NoChange);
        }
        log_diff(&self.location, &self.persisted, &rendered);

        let result = match &self.location {
            CrontabLocation::File(path) => {
                let desired = DesiredFileState::new(path.clone())
                    .contents(rendered.as_bytes())
                    .sudo(self.use_sudo);
                ensure_file(target, &desired)?
            }
            CrontabLocation::User(user) => {
                self.install(target, user.as_deref(), &rendered)?;
                if self.persisted.is_empty() {
                    ApplyResult::Created
                } else if rendered.is_empty() {
                    ApplyResult::Removed
                } else {
                    ApplyResult::Modified
                }
            }
        };

        log::info!("Updated {}", self.location);
        self.persisted = rendered;
        Ok(result)
    }

    /// Upload `text` to a scratch file on the target and hand it to `crontab`.
    ///
    /// The scratch file is created, written and removed by the same identity
    /// that runs `crontab`, so it can always read it.
    fn install(&self, target: &Target<'_>, user: Option<&str>, text: &str) -> Result<()> {
        let mut staged = NamedTempFile::new()?;
        staged.write_all(text.as_bytes())?;
        staged.flush()?;

        let sudo = self.use_sudo;
        let remote_tmp = target
            .run_checked(&ShellCommand::new("mktemp"), sudo)?
            .stdout_trimmed()
            .to_string();

        let installed = target.upload(staged.path(), &remote_tmp, sudo).and_then(|()| {
            let cmd = CrontabLocation::crontab_command(user).arg(&remote_tmp);
            target.run_checked(&cmd, sudo).map(|_| ())
        });

        let cleanup = ShellCommand::new("rm").args(["-f", "--", remote_tmp.as_str()]);
        if let Err(e) = target.run_checked(&cleanup, sudo) {
            log::warn!("Failed to remove {remote_tmp}: {e}");
        }
        installed
    }
}

fn log_diff(location: &CrontabLocation, old: &str, new: &str) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let diff = TextDiff::from_lines(old, new);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => log::debug!("{location}: - {}", change.value().trim_end()),
            ChangeTag::Insert => log::debug!("{location}: + {}", change.value().trim_end()),
            ChangeTag::Equal => {}
        }
    }
}

/// One named crontab block, declaratively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    pub name: String,
    pub content: String,
    pub location: CrontabLocation,
    pub use_sudo: bool,
    /// When false the block is removed instead
    pub present: bool,
}

impl CronEntry {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            location: CrontabLocation::default(),
            use_sudo: false,
            present: true,
        }
    }

    /// An entry that must not exist
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            present: false,
            ..Self::new(name, String::new())
        }
    }

    pub fn at(mut self, location: CrontabLocation) -> Self {
        self.location = location;
        self
    }

    pub fn sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    fn body(&self) -> Vec<String> {
        self.content.lines().map(str::to_string).collect()
    }
}

impl Resource for CronEntry {
    fn id(&self) -> String {
        format!("{}#{}", self.location, self.name)
    }

    fn description(&self) -> String {
        if self.present {
            format!("Ensure cron entry `{}` in {}", self.name, self.location)
        } else {
            format!("Remove cron entry `{}` from {}", self.name, self.location)
        }
    }

    fn resource_type(&self) -> &'static str {
        "crontab_entry"
    }

    fn current_state(&self, target: &Target<'_>) -> Result<ResourceState> {
        let crontab = Crontab::read(target, self.location.clone(), self.use_sudo)?;
        Ok(match crontab.document().entry(&self.name)? {
            Some(body) => ResourceState::Present {
                details: Some(body.join("\n")),
            },
            None => ResourceState::Absent,
        })
    }

    fn desired_state(&self, _target: &Target<'_>) -> Result<ResourceState> {
        Ok(if self.present {
            ResourceState::Present {
                details: Some(self.body().join("\n")),
            }
        } else {
            ResourceState::Absent
        })
    }

    fn apply(&self, target: &Target<'_>) -> Result<ApplyResult> {
        validate_name(&self.name)?;
        let mut crontab = Crontab::read(target, self.location.clone(), self.use_sudo)?;

        let existing = crontab.document().entry(&self.name)?.map(<[String]>::to_vec);
        let result = match (self.present, existing) {
            (true, Some(body)) if body == self.body() => return Ok(ApplyResult::NoChange),
            (true, existing) => {
                crontab.document_mut().add_entry(&self.name, &self.content)?;
                if existing.is_some() {
                    ApplyResult::Modified
                } else {
                    ApplyResult::Created
                }
            }
            (false, Some(_)) => {
                crontab.document_mut().del_entry(&self.name)?;
                ApplyResult::Removed
            }
            (false, None) => return Ok(ApplyResult::NoChange),
        };

        crontab.write(target)?;
        Ok(result)
    }
}
