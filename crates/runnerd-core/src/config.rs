//! Configuration types: desired runner state and agent settings

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A string that never shows up in logs
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Declared runner configuration, snapshotted per evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    /// CI server URL
    #[serde(default)]
    pub server_uri: Option<String>,
    /// Runner registration token
    #[serde(default)]
    pub token: Option<Secret>,
    /// Maximum number of concurrent jobs
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Seconds between job polls (0 uses the runner default)
    #[serde(default)]
    pub check_interval: u64,
}

fn default_concurrency() -> u32 {
    3
}

impl Default for DesiredConfig {
    fn default() -> Self {
        Self {
            server_uri: None,
            token: None,
            concurrency: default_concurrency(),
            check_interval: 0,
        }
    }
}

impl DesiredConfig {
    /// Reject values the runner cannot use
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` if `concurrency` is zero
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.concurrency == 0 {
            return Err(CoreError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set server URI and token
    #[must_use]
    pub fn with_credentials(mut self, uri: impl Into<String>, token: impl Into<String>) -> Self {
        self.server_uri = Some(uri.into());
        self.token = Some(Secret::new(token));
        self
    }
}

/// Where things live on the host and who owns them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Path of the persistent state file
    pub state_path: PathBuf,
    /// Runner configuration file rewritten by `apply_config`
    pub runner_config_path: PathBuf,
    /// Directory for the LXD executor scripts
    pub executor_dir: PathBuf,
    /// System user the runner runs as
    pub runner_user: String,
    /// Runner binary
    pub runner_binary: String,
    /// Host name override (otherwise `hostname` is queried)
    pub hostname: Option<String>,
    /// Distribution codename override (otherwise `lsb_release` is queried)
    pub distro_codename: Option<String>,
    /// Runner apt repository
    pub apt_repository: String,
    /// Runner apt signing key fingerprint
    pub apt_key: String,
    /// Image used by the docker executor
    pub docker_image: String,
    /// Prefix privileged commands with sudo
    pub use_sudo: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("/var/lib/runnerd/state.json"),
            runner_config_path: PathBuf::from("/etc/gitlab-runner/config.toml"),
            executor_dir: PathBuf::from("/opt/lxd-executor"),
            runner_user: "gitlab-runner".to_string(),
            runner_binary: "/usr/bin/gitlab-runner".to_string(),
            hostname: None,
            distro_codename: None,
            apt_repository: "https://packages.gitlab.com/runner/gitlab-runner/ubuntu/".to_string(),
            apt_key: "3F01618A51312F3F".to_string(),
            docker_image: "ubuntu:latest".to_string(),
            use_sudo: false,
        }
    }
}
