//! File convergence
//!
//! [`ensure_file`] is the heart of the crate. Content and metadata are
//! converged separately:
//!
//! 1. Content is compared (by existence, or by digest) and uploaded or
//!    fetched only when it differs. Uploads are the expensive step.
//! 2. Owner, group and mode are reapplied on every call when specified, so
//!    permission drift is corrected even when the content already matches.
//!
//! Inline content is staged in a named temporary file that is removed when
//! the call returns, on success or failure alike.

use crate::digest::{Digest, Fingerprint, digest_file};
use crate::error::{Error, Result};
use crate::probe;
use crate::resource::{ApplyResult, Resource, ResourceState};
use crate::target::Target;
use shellexec::ShellCommand;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Where the content of a file comes from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentSource {
    /// No content: the file only has to exist (created empty if missing)
    #[default]
    None,
    /// Bytes held in memory
    Inline(Vec<u8>),
    /// A file on the local machine
    LocalFile(PathBuf),
    /// A URL fetched by the target itself
    Url(String),
}

/// Desired state of one file on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredFileState {
    pub path: String,
    pub source: ContentSource,
    /// Digest the URL content is known to have; lets an existing file skip
    /// the fetch
    pub expected_digest: Option<Digest>,
    pub owner: Option<String>,
    /// `None` leaves the group unchanged
    pub group: Option<String>,
    pub mode: Option<String>,
    pub use_sudo: bool,
    /// Compare digests before skipping an upload (default). When false, an
    /// existing file is assumed current, which saves hashing very large
    /// files at the risk of leaving stale content.
    pub verify_remote: bool,
}

impl DesiredFileState {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: ContentSource::None,
            expected_digest: None,
            owner: None,
            group: None,
            mode: None,
            use_sudo: false,
            verify_remote: true,
        }
    }

    /// Use in-memory content
    pub fn contents(mut self, contents: impl Into<Vec<u8>>) -> Self {
        self.source = ContentSource::Inline(contents.into());
        self
    }

    /// Use the content of a local file
    pub fn source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = ContentSource::LocalFile(path.into());
        self
    }

    /// Have the target fetch the content from `url`
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.source = ContentSource::Url(url.into());
        self
    }

    pub fn expected_digest(mut self, digest: Digest) -> Self {
        self.expected_digest = Some(digest);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn verify_remote(mut self, verify: bool) -> Self {
        self.verify_remote = verify;
        self
    }

    /// Reject empty or ambiguous descriptors before touching the target
    pub fn validate(&self) -> Result<()> {
        validate_path(&self.path)?;
        validate_metadata(
            self.owner.as_deref(),
            self.group.as_deref(),
            self.mode.as_deref(),
        )?;
        if self.expected_digest.is_some() && !matches!(self.source, ContentSource::Url(_)) {
            return Err(Error::Usage(format!(
                "{}: an expected digest only applies to URL content",
                self.path
            )));
        }
        if let ContentSource::Url(url) = &self.source
            && url.trim().is_empty()
        {
            return Err(Error::Usage(format!("{}: empty URL", self.path)));
        }
        Ok(())
    }

    /// The digest the target file must have, or `None` when only existence
    /// is checked
    fn wanted_digest(&self, target: &Target<'_>) -> Result<Option<Digest>> {
        match &self.source {
            ContentSource::None => Ok(None),
            ContentSource::Url(_) => Ok(self.expected_digest.clone()),
            ContentSource::Inline(_) | ContentSource::LocalFile(_) if !self.verify_remote => {
                Ok(None)
            }
            ContentSource::Inline(bytes) => {
                Ok(Some(crate::digest::digest_bytes(target.algorithm(), bytes)))
            }
            ContentSource::LocalFile(local) => Ok(Some(local_digest(target, local)?)),
        }
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::Usage("no path given".to_string()));
    }
    Ok(())
}

fn validate_metadata(owner: Option<&str>, group: Option<&str>, mode: Option<&str>) -> Result<()> {
    if owner.is_some_and(|o| o.trim().is_empty()) {
        return Err(Error::Usage("empty owner".to_string()));
    }
    if group.is_some_and(|g| g.trim().is_empty()) {
        return Err(Error::Usage("empty group".to_string()));
    }
    if let Some(mode) = mode {
        let valid = !mode.is_empty() && mode.chars().all(|c| "01234567ugoa+-=rwxXst,".contains(c));
        if !valid {
            return Err(Error::Usage(format!("invalid mode `{mode}`")));
        }
    }
    Ok(())
}

fn local_digest(target: &Target<'_>, local: &Path) -> Result<Digest> {
    match digest_file(target.algorithm(), local)? {
        Fingerprint::Present(digest) => Ok(digest),
        Fingerprint::Absent => Err(Error::Usage(format!(
            "source file {} does not exist",
            local.display()
        ))),
    }
}

/// Write inline content to a temporary file that is deleted on drop
fn stage(contents: &[u8]) -> Result<NamedTempFile> {
    let mut staged = NamedTempFile::new()?;
    staged.write_all(contents)?;
    staged.flush()?;
    Ok(staged)
}

/// Converge one file: content first, then owner/group/mode.
///
/// Idempotent: a second call with the same descriptor performs no upload or
/// fetch. Returns what happened to the content (`Created`, `Modified` or
/// `NoChange`); metadata is reapplied either way.
pub fn ensure_file(target: &Target<'_>, desired: &DesiredFileState) -> Result<ApplyResult> {
    desired.validate()?;

    let result = match &desired.source {
        ContentSource::None => create_empty(target, desired)?,
        ContentSource::Url(url) => fetch_url(target, desired, url)?,
        ContentSource::Inline(contents) => {
            let staged = stage(contents)?;
            sync_local(target, desired, staged.path())?
        }
        ContentSource::LocalFile(local) => sync_local(target, desired, local)?,
    };

    reconcile_metadata(
        target,
        &desired.path,
        desired.owner.as_deref(),
        desired.group.as_deref(),
        desired.mode.as_deref(),
        desired.use_sudo,
    )?;

    Ok(result)
}

fn create_empty(target: &Target<'_>, desired: &DesiredFileState) -> Result<ApplyResult> {
    if probe::exists(target, &desired.path, desired.use_sudo)? {
        return Ok(ApplyResult::NoChange);
    }
    let touch = ShellCommand::new("touch").arg("--").arg(&desired.path);
    target.run_checked(&touch, desired.use_sudo)?;
    log::info!("Created empty file {}", desired.path);
    Ok(ApplyResult::Created)
}

fn fetch_url(target: &Target<'_>, desired: &DesiredFileState, url: &str) -> Result<ApplyResult> {
    let path = desired.path.as_str();
    let sudo = desired.use_sudo;

    let existed = probe::exists(target, path, sudo)?;
    if existed {
        match &desired.expected_digest {
            None => return Ok(ApplyResult::NoChange),
            Some(expected) => {
                if probe::digest_of(target, path, sudo)?.digest() == Some(expected) {
                    return Ok(ApplyResult::NoChange);
                }
            }
        }
    }

    target.download(url, path, sudo)?;

    if let Some(expected) = &desired.expected_digest {
        verify(target, path, sudo, expected)?;
    }

    Ok(if existed {
        ApplyResult::Modified
    } else {
        ApplyResult::Created
    })
}

fn sync_local(target: &Target<'_>, desired: &DesiredFileState, local: &Path) -> Result<ApplyResult> {
    let path = desired.path.as_str();
    let sudo = desired.use_sudo;

    if !desired.verify_remote {
        if probe::exists(target, path, sudo)? {
            return Ok(ApplyResult::NoChange);
        }
        target.upload(local, path, sudo)?;
        return Ok(ApplyResult::Created);
    }

    let wanted = local_digest(target, local)?;
    let remote = probe::digest_of(target, path, sudo)?;
    if remote.digest() == Some(&wanted) {
        log::debug!("{path} is up to date ({wanted})");
        return Ok(ApplyResult::NoChange);
    }

    log::debug!("{path}: remote {remote}, local {wanted}");
    target.upload(local, path, sudo)?;
    verify(target, path, sudo, &wanted)?;

    Ok(if remote.is_absent() {
        ApplyResult::Created
    } else {
        ApplyResult::Modified
    })
}

/// Re-probe `path` after a transfer and check it holds `expected`
fn verify(target: &Target<'_>, path: &str, sudo: bool, expected: &Digest) -> Result<()> {
    let actual = probe::digest_of(target, path, sudo)?;
    if actual.digest() == Some(expected) {
        return Ok(());
    }
    Err(Error::Verification {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

/// Apply ownership and mode. Each step is idempotent and runs whenever its
/// value is given.
fn reconcile_metadata(
    target: &Target<'_>,
    path: &str,
    owner: Option<&str>,
    group: Option<&str>,
    mode: Option<&str>,
    use_sudo: bool,
) -> Result<()> {
    let ownership = match (owner, group) {
        (Some(owner), Some(group)) => Some(
            ShellCommand::new("chown")
                .arg("--")
                .arg(format!("{owner}:{group}"))
                .arg(path),
        ),
        (Some(owner), None) => Some(ShellCommand::new("chown").arg("--").arg(owner).arg(path)),
        (None, Some(group)) => Some(ShellCommand::new("chgrp").arg("--").arg(group).arg(path)),
        (None, None) => None,
    };
    if let Some(cmd) = ownership {
        target.run_checked(&cmd, use_sudo)?;
    }

    if let Some(mode) = mode {
        let chmod = ShellCommand::new("chmod").arg("--").arg(mode).arg(path);
        target.run_checked(&chmod, use_sudo)?;
    }
    Ok(())
}

/// Desired state of a directory on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredDirectory {
    pub path: String,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<String>,
    pub use_sudo: bool,
}

impl DesiredDirectory {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            owner: None,
            group: None,
            mode: None,
            use_sudo: false,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }
}

/// Converge a directory (parents included); metadata is reapplied every call
pub fn ensure_directory(target: &Target<'_>, desired: &DesiredDirectory) -> Result<ApplyResult> {
    validate_path(&desired.path)?;
    validate_metadata(
        desired.owner.as_deref(),
        desired.group.as_deref(),
        desired.mode.as_deref(),
    )?;

    let path = desired.path.as_str();
    let result = if probe::is_dir(target, path, desired.use_sudo)? {
        ApplyResult::NoChange
    } else if probe::exists(target, path, desired.use_sudo)? {
        return Err(Error::Conflict {
            path: path.to_string(),
            detail: "exists and is not a directory".to_string(),
        });
    } else {
        let mkdir = ShellCommand::new("mkdir").args(["-p", "--", path]);
        target.run_checked(&mkdir, desired.use_sudo)?;
        log::info!("Created directory {path}");
        ApplyResult::Created
    };

    reconcile_metadata(
        target,
        path,
        desired.owner.as_deref(),
        desired.group.as_deref(),
        desired.mode.as_deref(),
        desired.use_sudo,
    )?;
    Ok(result)
}

/// Desired symlink on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSymlink {
    /// What the link points to
    pub source: String,
    /// Where the link lives
    pub path: String,
    pub use_sudo: bool,
}

impl DesiredSymlink {
    pub fn new(source: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
            use_sudo: false,
        }
    }

    pub fn sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }
}

/// Converge a symlink. An existing link to another source is replaced; a
/// regular file or directory in the way is a conflict.
pub fn ensure_symlink(target: &Target<'_>, desired: &DesiredSymlink) -> Result<ApplyResult> {
    validate_path(&desired.path)?;
    if desired.source.is_empty() {
        return Err(Error::Usage(format!("{}: empty symlink source", desired.path)));
    }

    let path = desired.path.as_str();
    let ln = ShellCommand::new("ln")
        .args(["-sfn", "--"])
        .arg(&desired.source)
        .arg(path);

    match probe::link_target(target, path, desired.use_sudo)? {
        Some(current) if current == desired.source => Ok(ApplyResult::NoChange),
        Some(current) => {
            log::info!("Repointing {path}: {current} -> {}", desired.source);
            target.run_checked(&ln, desired.use_sudo)?;
            Ok(ApplyResult::Modified)
        }
        None if probe::exists(target, path, desired.use_sudo)? => Err(Error::Conflict {
            path: path.to_string(),
            detail: "exists and is not a symlink".to_string(),
        }),
        None => {
            target.run_checked(&ln, desired.use_sudo)?;
            Ok(ApplyResult::Created)
        }
    }
}

/// Remove a file, symlink or directory tree if present
pub fn remove_path(target: &Target<'_>, path: &str, use_sudo: bool) -> Result<ApplyResult> {
    validate_path(path)?;
    if !probe::exists(target, path, use_sudo)? {
        return Ok(ApplyResult::NoChange);
    }

    let recursive = probe::is_dir(target, path, use_sudo)? && !probe::is_link(target, path, use_sudo)?;
    let flags = if recursive { "-rf" } else { "-f" };
    let rm = ShellCommand::new("rm").args([flags, "--", path]);
    target.run_checked(&rm, use_sudo)?;
    log::info!("Removed {path}");
    Ok(ApplyResult::Removed)
}

impl Resource for DesiredFileState {
    fn id(&self) -> String {
        self.path.clone()
    }

    fn description(&self) -> String {
        match &self.source {
            ContentSource::None => format!("Ensure file {} exists", self.path),
            ContentSource::Inline(bytes) => {
                format!("Ensure {} holds {} bytes of content", self.path, bytes.len())
            }
            ContentSource::LocalFile(local) => {
                format!("Sync {} from {}", self.path, local.display())
            }
            ContentSource::Url(url) => format!("Fetch {url} into {}", self.path),
        }
    }

    fn resource_type(&self) -> &'static str {
        "file"
    }

    /// Content state only; metadata is not compared
    fn current_state(&self, target: &Target<'_>) -> Result<ResourceState> {
        if self.wanted_digest(target)?.is_none() {
            return Ok(if probe::exists(target, &self.path, self.use_sudo)? {
                ResourceState::Present { details: None }
            } else {
                ResourceState::Absent
            });
        }

        Ok(match probe::digest_of(target, &self.path, self.use_sudo)? {
            Fingerprint::Absent => ResourceState::Absent,
            Fingerprint::Present(digest) => ResourceState::Present {
                details: Some(digest.to_string()),
            },
        })
    }

    fn desired_state(&self, target: &Target<'_>) -> Result<ResourceState> {
        Ok(ResourceState::Present {
            details: self.wanted_digest(target)?.map(|d| d.to_string()),
        })
    }

    fn apply(&self, target: &Target<'_>) -> Result<ApplyResult> {
        ensure_file(target, self)
    }
}

impl Resource for DesiredDirectory {
    fn id(&self) -> String {
        self.path.clone()
    }

    fn description(&self) -> String {
        format!("Ensure directory {}", self.path)
    }

    fn resource_type(&self) -> &'static str {
        "directory"
    }

    fn current_state(&self, target: &Target<'_>) -> Result<ResourceState> {
        if probe::is_dir(target, &self.path, self.use_sudo)? {
            Ok(ResourceState::Present { details: None })
        } else if probe::exists(target, &self.path, self.use_sudo)? {
            Ok(ResourceState::Modified {
                from: "non-directory".to_string(),
                to: "directory".to_string(),
            })
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self, _target: &Target<'_>) -> Result<ResourceState> {
        Ok(ResourceState::Present { details: None })
    }

    fn apply(&self, target: &Target<'_>) -> Result<ApplyResult> {
        ensure_directory(target, self)
    }
}

impl Resource for DesiredSymlink {
    fn id(&self) -> String {
        self.path.clone()
    }

    fn description(&self) -> String {
        format!("Symlink {} -> {}", self.path, self.source)
    }

    fn resource_type(&self) -> &'static str {
        "symlink"
    }

    fn current_state(&self, target: &Target<'_>) -> Result<ResourceState> {
        match probe::link_target(target, &self.path, self.use_sudo)? {
            Some(current) => Ok(ResourceState::Present {
                details: Some(format!("-> {current}")),
            }),
            None if probe::exists(target, &self.path, self.use_sudo)? => {
                Ok(ResourceState::Modified {
                    from: "regular file".to_string(),
                    to: format!("symlink -> {}", self.source),
                })
            }
            None => Ok(ResourceState::Absent),
        }
    }

    fn desired_state(&self, _target: &Target<'_>) -> Result<ResourceState> {
        Ok(ResourceState::Present {
            details: Some(format!("-> {}", self.source)),
        })
    }

    fn apply(&self, target: &Target<'_>) -> Result<ApplyResult> {
        ensure_symlink(target, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{DigestAlgorithm, digest_bytes};
    use crate::probe::tests::current_user;
    use shellexec::{ExecContext, LocalExecutor, RecordingExecutor, SshExecutor, SshOptions};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn path_str(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().to_string()
    }

    fn mode_bits(path: &str) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn test_inline_content_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "motd");
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path).contents("welcome\n");

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::Created);
        assert_eq!(exec.upload_count(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "welcome\n");

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::NoChange);
        assert_eq!(exec.upload_count(), 1);
    }

    #[test]
    fn test_different_content_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "app.conf");
        fs::write(&path, "old").unwrap();

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path).contents("new");

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::Modified);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(exec.upload_count(), 1);
    }

    #[test]
    fn test_matching_digest_skips_upload_but_reapplies_metadata() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "id_rsa.pub");
        fs::write(&path, "ssh-ed25519 AAAA").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path)
            .contents("ssh-ed25519 AAAA")
            .owner(current_user())
            .mode("600");

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::NoChange);
        assert_eq!(exec.upload_count(), 0);
        assert_eq!(mode_bits(&path), 0o600);

        let commands = exec.commands();
        assert!(commands.iter().any(|c| c.starts_with("chown -- ")));
        assert!(commands.iter().any(|c| c.starts_with("chmod -- 600 ")));
    }

    #[test]
    fn test_metadata_reapplied_on_every_call() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "script.sh");
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path)
            .contents("#!/bin/sh\n")
            .mode("755");

        ensure_file(&target, &desired).unwrap();
        assert_eq!(mode_bits(&path), 0o755);

        // drift out of band
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        exec.clear();

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::NoChange);
        assert_eq!(exec.upload_count(), 0);
        assert_eq!(mode_bits(&path), 0o755);
    }

    #[test]
    fn test_local_source_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.txt");
        fs::write(&source, "from disk").unwrap();
        let path = path_str(&dir, "dest.txt");

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path).source_file(&source);

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::Created);
        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::NoChange);
        assert_eq!(exec.upload_count(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "from disk");
    }

    #[test]
    fn test_missing_local_source_is_usage_error() {
        let dir = TempDir::new().unwrap();
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired =
            DesiredFileState::new(path_str(&dir, "dest")).source_file(dir.path().join("nope"));

        let err = ensure_file(&target, &desired).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert_eq!(exec.upload_count(), 0);
    }

    #[test]
    fn test_without_verification_existing_file_wins() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "big.iso");
        fs::write(&path, "stale").unwrap();

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path)
            .contents("fresh")
            .verify_remote(false);

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::NoChange);
        assert_eq!(exec.upload_count(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "stale");

        fs::remove_file(&path).unwrap();
        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::Created);
        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh");
    }

    #[test]
    fn test_path_only_creates_empty_file_once() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "app.lock");
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path);

        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::Created);
        assert_eq!(fs::read(&path).unwrap(), b"");

        fs::write(&path, "pid 42").unwrap();
        assert_eq!(ensure_file(&target, &desired).unwrap(), ApplyResult::NoChange);
        assert_eq!(fs::read_to_string(&path).unwrap(), "pid 42");
        assert_eq!(exec.upload_count(), 0);
    }

    #[test]
    fn test_url_skips_fetch_when_present() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "release.tgz");
        fs::write(&path, "archive").unwrap();

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());

        let no_digest = DesiredFileState::new(&path).url("https://example.invalid/release.tgz");
        assert_eq!(ensure_file(&target, &no_digest).unwrap(), ApplyResult::NoChange);

        let digest = digest_bytes(DigestAlgorithm::Sha256, b"archive");
        let matching = no_digest.clone().expected_digest(digest);
        assert_eq!(ensure_file(&target, &matching).unwrap(), ApplyResult::NoChange);

        assert_eq!(exec.download_count(), 0);
    }

    #[test]
    fn test_url_fetch_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "release.tgz");
        fs::write(&path, "archive").unwrap();

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path)
            .url("http://127.0.0.1:9/release.tgz")
            .expected_digest(digest_bytes(DigestAlgorithm::Sha256, b"other"));

        assert!(ensure_file(&target, &desired).is_err());
        assert_eq!(exec.download_count(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "archive");
    }

    #[test]
    fn test_failed_fetch_is_retried_next_time() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "pkg.tgz");

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path).url("http://127.0.0.1:9/pkg.tgz");

        // nothing is left behind, so the second call fetches again
        for attempt in 1..=2 {
            assert!(ensure_file(&target, &desired).is_err());
            assert!(!std::path::Path::new(&path).exists());
            assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
            assert_eq!(exec.download_count(), attempt);
        }
    }

    #[test]
    fn test_staged_content_removed_after_failed_upload() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "missing-dir/motd");

        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());
        let err = ensure_file(&target, &DesiredFileState::new(&path).contents("hello\n")).unwrap_err();
        assert!(matches!(err, Error::Exec(shellexec::Error::Upload { .. })), "{err:?}");

        let staged: Vec<_> = exec
            .invocations()
            .into_iter()
            .filter_map(|inv| match inv {
                shellexec::Invocation::Upload { local, .. } => Some(local),
                _ => None,
            })
            .collect();
        assert_eq!(staged.len(), 1);
        assert!(!staged[0].exists());
    }

    #[test]
    fn test_unreachable_host_is_connectivity_error() {
        let exec = SshExecutor::new(SshOptions::default()).with_program("/definitely/not/ssh");
        let target = Target::new(&exec, ExecContext::remote("web1"));

        let cases = [
            DesiredFileState::new("/etc/motd").contents("hi\n"),
            DesiredFileState::new("/etc/motd"),
            DesiredFileState::new("/opt/pkg.tgz").url("https://example.invalid/pkg.tgz"),
        ];
        for desired in &cases {
            let err = ensure_file(&target, desired).unwrap_err();
            assert!(err.is_connectivity(), "{desired:?}: {err}");
            assert!(matches!(err, Error::Exec(_)));
        }
    }

    #[test]
    fn test_usage_errors_fail_before_remote_calls() {
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());

        let cases = [
            DesiredFileState::new("").contents("x"),
            DesiredFileState::new("/tmp/x").mode("rw-r--r-- ; reboot"),
            DesiredFileState::new("/tmp/x").owner(""),
            DesiredFileState::new("/tmp/x")
                .contents("x")
                .expected_digest(digest_bytes(DigestAlgorithm::Sha256, b"x")),
        ];
        for desired in &cases {
            let err = ensure_file(&target, desired).unwrap_err();
            assert!(matches!(err, Error::Usage(_)), "{desired:?}: {err}");
        }
        assert!(exec.invocations().is_empty());
    }

    #[test]
    fn test_ownership_commands() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "owned");
        fs::write(&path, "").unwrap();
        let exec = RecordingExecutor::new(LocalExecutor::new());
        let target = Target::new(&exec, ExecContext::local());

        let user = current_user();
        let group = crate::probe::tests::current_group();
        reconcile_metadata(
            &target,
            &path,
            Some(user.as_str()),
            Some(group.as_str()),
            None,
            false,
        )
        .unwrap();
        reconcile_metadata(&target, &path, None, Some(group.as_str()), None, false).unwrap();

        let commands = exec.commands();
        assert_eq!(
            commands[0],
            ShellCommand::new("chown")
                .arg("--")
                .arg(format!("{user}:{group}"))
                .arg(&path)
                .render()
        );
        assert!(commands[1].starts_with("chgrp -- "));
    }

    #[test]
    fn test_ensure_directory() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "a/b/c");
        let exec = LocalExecutor::new();
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredDirectory::new(&path).mode("750");

        assert_eq!(ensure_directory(&target, &desired).unwrap(), ApplyResult::Created);
        assert!(dir.path().join("a/b/c").is_dir());
        assert_eq!(mode_bits(&path), 0o750);
        assert_eq!(ensure_directory(&target, &desired).unwrap(), ApplyResult::NoChange);

        let file = path_str(&dir, "plain");
        fs::write(&file, "").unwrap();
        let err = ensure_directory(&target, &DesiredDirectory::new(&file)).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn test_ensure_symlink() {
        let dir = TempDir::new().unwrap();
        let v1 = path_str(&dir, "v1");
        let v2 = path_str(&dir, "v2");
        fs::create_dir(&v1).unwrap();
        fs::create_dir(&v2).unwrap();
        let current = path_str(&dir, "current");

        let exec = LocalExecutor::new();
        let target = Target::new(&exec, ExecContext::local());

        let to_v1 = DesiredSymlink::new(&v1, &current);
        assert_eq!(ensure_symlink(&target, &to_v1).unwrap(), ApplyResult::Created);
        assert_eq!(ensure_symlink(&target, &to_v1).unwrap(), ApplyResult::NoChange);

        let to_v2 = DesiredSymlink::new(&v2, &current);
        assert_eq!(ensure_symlink(&target, &to_v2).unwrap(), ApplyResult::Modified);
        assert_eq!(fs::read_link(&current).unwrap().to_string_lossy(), v2);

        let err = ensure_symlink(&target, &DesiredSymlink::new(&v1, &v2)).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn test_remove_path() {
        let dir = TempDir::new().unwrap();
        let tree = path_str(&dir, "tree");
        fs::create_dir_all(dir.path().join("tree/sub")).unwrap();
        fs::write(dir.path().join("tree/sub/f"), "x").unwrap();

        let exec = LocalExecutor::new();
        let target = Target::new(&exec, ExecContext::local());

        assert_eq!(remove_path(&target, &tree, false).unwrap(), ApplyResult::Removed);
        assert!(!dir.path().join("tree").exists());
        assert_eq!(remove_path(&target, &tree, false).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_resource_states() {
        let dir = TempDir::new().unwrap();
        let path = path_str(&dir, "conf");
        let exec = LocalExecutor::new();
        let target = Target::new(&exec, ExecContext::local());
        let desired = DesiredFileState::new(&path).contents("a=1\n");

        assert!(desired.needs_apply(&target).unwrap());
        assert!(desired.current_state(&target).unwrap().is_absent());

        desired.apply(&target).unwrap();
        assert!(!desired.needs_apply(&target).unwrap());
    }
}
