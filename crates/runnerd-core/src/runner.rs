//! Runner CLI: registration and unregistration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use runnerd_exec::{CommandExecutor, CommandLine};
use tracing::{info, instrument};

use crate::config::Secret;
use crate::error::CoreError;

/// A way the runner executes jobs; each mode is registered separately
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorMode {
    /// Jobs run in docker containers
    Docker {
        /// Default job image
        image: String,
    },
    /// Jobs run in LXD containers driven by custom executor scripts
    Lxd {
        /// Directory holding `run.sh`, `prepare.sh` and `cleanup.sh`
        executor_dir: PathBuf,
    },
}

impl ExecutorMode {
    /// Tag attached to the registration; also the runner name suffix
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutorMode::Docker { .. } => "docker",
            ExecutorMode::Lxd { .. } => "lxd",
        }
    }

    /// Value of `--executor`
    #[must_use]
    pub fn executor(&self) -> &'static str {
        match self {
            ExecutorMode::Docker { .. } => "docker",
            ExecutorMode::Lxd { .. } => "custom",
        }
    }

    fn extra_args(&self) -> Vec<String> {
        match self {
            ExecutorMode::Docker { image } => {
                vec!["--docker-image".to_string(), image.clone()]
            }
            ExecutorMode::Lxd { executor_dir } => {
                let script = |name: &str| script_path(executor_dir, name);
                vec![
                    "--builds-dir".to_string(),
                    "/builds".to_string(),
                    "--cache-dir".to_string(),
                    "/cache".to_string(),
                    "--custom-run-exec".to_string(),
                    script("run.sh"),
                    "--custom-prepare-exec".to_string(),
                    script("prepare.sh"),
                    "--custom-cleanup-exec".to_string(),
                    script("cleanup.sh"),
                ]
            }
        }
    }
}

fn script_path(dir: &Path, name: &str) -> String {
    dir.join(name).display().to_string()
}

/// Identity used to name a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationIdentity {
    pub host_name: String,
    pub executor_tag: String,
}

impl RegistrationIdentity {
    #[must_use]
    pub fn new(host_name: &str, mode: &ExecutorMode) -> Self {
        Self {
            host_name: host_name.to_string(),
            executor_tag: mode.tag().to_string(),
        }
    }

    /// `<host>-<tag>`, unique per host and mode
    #[must_use]
    pub fn runner_name(&self) -> String {
        format!("{}-{}", self.host_name, self.executor_tag)
    }
}

/// Wrapper around the runner binary
pub struct RunnerCli {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    use_sudo: bool,
}

impl RunnerCli {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        binary: impl Into<String>,
        use_sudo: bool,
    ) -> Self {
        Self {
            executor,
            binary: binary.into(),
            use_sudo,
        }
    }

    /// Build the non-interactive `register` invocation for one mode
    #[must_use]
    pub fn register_command(
        &self,
        server_uri: &str,
        token: &Secret,
        host_name: &str,
        mode: &ExecutorMode,
    ) -> CommandLine {
        let identity = RegistrationIdentity::new(host_name, mode);

        CommandLine::new(&self.binary)
            .args(["register", "--non-interactive", "--url", server_uri])
            .arg("--registration-token")
            .secret_arg(token.expose())
            .args(["--name".to_string(), identity.runner_name()])
            .args(["--tag-list", mode.tag(), "--executor", mode.executor()])
            .args(mode.extra_args())
            .with_sudo(self.use_sudo)
    }

    /// Register one executor mode with the CI server
    ///
    /// # Errors
    /// Returns `CoreError::CommandFailed` if the runner exits non-zero
    #[instrument(skip(self, token), fields(mode = mode.tag()))]
    pub async fn register(
        &self,
        server_uri: &str,
        token: &Secret,
        host_name: &str,
        mode: &ExecutorMode,
    ) -> Result<(), CoreError> {
        let cmd = self.register_command(server_uri, token, host_name, mode);
        self.executor.run_checked(&cmd).await?;

        info!(server = %server_uri, mode = mode.tag(), "runner registered");
        Ok(())
    }

    /// Remove every registration known to the local runner
    ///
    /// # Errors
    /// Returns `CoreError::CommandFailed` if the runner exits non-zero
    #[instrument(skip(self))]
    pub async fn unregister_all(&self) -> Result<(), CoreError> {
        let cmd = CommandLine::new(&self.binary)
            .args(["unregister", "--all-runners"])
            .with_sudo(self.use_sudo);
        self.executor.run_checked(&cmd).await?;

        info!("all runners unregistered");
        Ok(())
    }
}
