//! Target configuration
//!
//! Provisioning scripts usually point at one host. Its connection details
//! live in a TOML file so they stay out of the script:
//!
//! ```toml
//! host = "web1.example.com"
//! user = "deploy"
//! port = 2222
//! identity_file = "~/.ssh/deploy_ed25519"
//! ssh_options = ["StrictHostKeyChecking=accept-new"]
//! sudo = false
//! digest = "sha256"
//! ```
//!
//! Location priority:
//! 1. `IDEM_CONFIG` env var
//! 2. `<config dir>/idem/target.toml`

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::target::Target;
use serde::{Deserialize, Serialize};
use shellexec::{ExecContext, Executor, LocalExecutor, SshExecutor, SshOptions};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const ENV_CONFIG: &str = "IDEM_CONFIG";

/// Expand `~` and environment variables in a path
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Where the target config is looked up, if a location can be determined
pub fn default_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        let path = expand(&path);
        log::debug!("Using config from {ENV_CONFIG}: {}", path.display());
        return Some(path);
    }
    dirs::config_dir().map(|dir| dir.join("idem").join("target.toml"))
}

/// Connection and elevation settings for one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Remote host; the local machine when unset
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    /// Extra `ssh -o` options
    pub ssh_options: Vec<String>,
    /// Seconds
    pub connect_timeout: Option<u64>,
    /// Elevate every command
    pub sudo: bool,
    pub sudo_user: Option<String>,
    pub digest: DigestAlgorithm,
}

impl TargetConfig {
    /// Parse TOML text; `origin` only labels errors
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|source| Error::Config {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    /// Load from [`default_path`]; a missing file means the local machine
    pub fn load_default() -> Result<Self> {
        match default_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                log::debug!("No target config at {}, using local", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn is_local(&self) -> bool {
        self.host.is_none()
    }

    pub fn exec_context(&self) -> ExecContext {
        ExecContext {
            host: self.host.clone(),
            user: self.user.clone(),
            sudo: self.sudo,
            sudo_user: self.sudo_user.clone(),
            cwd: None,
        }
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            port: self.port,
            identity_file: self.identity_file.as_deref().map(expand),
            connect_timeout: self.connect_timeout,
            options: self.ssh_options.clone(),
            ..SshOptions::default()
        }
    }

    /// The executor matching this config: ssh for a host, local otherwise
    pub fn executor(&self) -> Box<dyn Executor> {
        if self.is_local() {
            Box::new(LocalExecutor::new())
        } else {
            Box::new(SshExecutor::new(self.ssh_options()))
        }
    }

    /// Bind `executor` to this config's context and digest algorithm
    pub fn target<'a>(&self, executor: &'a dyn Executor) -> Target<'a> {
        Target::new(executor, self.exec_context()).with_algorithm(self.digest)
    }
}
