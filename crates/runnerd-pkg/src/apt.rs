//! APT package manager (Debian/Ubuntu)

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use runnerd_exec::{CommandExecutor, CommandLine, CommandResult};
use tracing::{debug, info, instrument};

use crate::error::PackageError;
use crate::host::HostTools;
use crate::traits::PackageManager;
use crate::types::AptSource;

/// Default directory for apt list files
pub const DEFAULT_SOURCES_DIR: &str = "/etc/apt/sources.list.d";

/// Keyserver for signing keys
pub const DEFAULT_KEYSERVER: &str = "hkp://keyserver.ubuntu.com:80";

/// APT package manager implementation
pub struct AptManager {
    /// Executor for running commands
    executor: Arc<dyn CommandExecutor>,
    /// Whether to use sudo
    use_sudo: bool,
    /// Where list files are written
    sources_dir: PathBuf,
    /// Writes list files, through sudo if needed
    host: HostTools,
}

impl AptManager {
    /// Create a new APT manager
    ///
    /// # Arguments
    /// * `executor` - Executor for running apt commands
    /// * `use_sudo` - Whether to prefix commands with sudo
    pub fn new(executor: Arc<dyn CommandExecutor>, use_sudo: bool) -> Self {
        Self {
            host: HostTools::new(executor.clone(), use_sudo),
            executor,
            use_sudo,
            sources_dir: PathBuf::from(DEFAULT_SOURCES_DIR),
        }
    }

    /// Write list files somewhere other than `/etc/apt/sources.list.d`
    #[must_use]
    pub fn with_sources_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sources_dir = dir.into();
        self
    }

    /// Build apt-get command with optional sudo
    fn apt_cmd(&self, args: &[&str]) -> CommandLine {
        CommandLine::new("apt-get")
            .args(args.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
            .with_sudo(self.use_sudo)
    }

    /// Run an apt command and classify failures
    async fn run_apt(&self, cmd: CommandLine) -> Result<CommandResult, PackageError> {
        let result = self.executor.run(&cmd).await?;

        if !result.success() {
            return Err(PackageError::from_apt_failure(result.status, &result.stderr));
        }

        Ok(result)
    }
}

#[async_trait]
impl PackageManager for AptManager {
    #[instrument(skip(self), fields(source = %source.name))]
    async fn add_source(&self, source: &AptSource) -> Result<(), PackageError> {
        info!(line = %source.line, key = %source.key, "adding apt source");

        let key_cmd = CommandLine::new("apt-key")
            .args(["adv", "--keyserver", DEFAULT_KEYSERVER, "--recv-keys", &source.key])
            .with_sudo(self.use_sudo);
        self.executor.run_checked(&key_cmd).await?;

        self.host.create_dir(&self.sources_dir).await?;

        let path = self.sources_dir.join(source.list_file());
        self.host
            .write_file(&path, format!("{}\n", source.line).as_bytes(), 0o644)
            .await?;

        debug!(path = %path.display(), "wrote apt list file");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update(&self) -> Result<(), PackageError> {
        debug!("refreshing package lists");

        let result = self.run_apt(self.apt_cmd(&["update", "-qq"])).await;
        match result {
            Ok(_) => Ok(()),
            Err(PackageError::CommandFailed { message, .. }) => {
                Err(PackageError::RepositoryUnavailable(message))
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn install(&self, packages: &[&str]) -> Result<(), PackageError> {
        info!(?packages, "installing packages");

        let mut args = vec![
            "--assume-yes",
            "--option=Dpkg::Options::=--force-confold",
            "install",
        ];
        args.extend_from_slice(packages);

        self.run_apt(self.apt_cmd(&args)).await?;

        info!(?packages, "apt install completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnerd_exec::RecordingExecutor;

    fn manager(executor: &Arc<RecordingExecutor>, dir: &std::path::Path) -> AptManager {
        AptManager::new(executor.clone(), false).with_sources_dir(dir)
    }

    #[tokio::test]
    async fn test_add_source_imports_key_and_writes_list() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let apt = manager(&executor, dir.path());

        let source = AptSource::new(
            "gitlab-runner",
            "https://packages.gitlab.com/runner/gitlab-runner/ubuntu/",
            "bionic",
            "3F01618A51312F3F",
        );
        apt.add_source(&source).await.unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].argv(),
            vec![
                "apt-key",
                "adv",
                "--keyserver",
                DEFAULT_KEYSERVER,
                "--recv-keys",
                "3F01618A51312F3F"
            ]
        );

        let contents = std::fs::read_to_string(dir.path().join("gitlab-runner.list")).unwrap();
        assert_eq!(
            contents,
            "deb https://packages.gitlab.com/runner/gitlab-runner/ubuntu/ bionic main\n"
        );
    }

    #[tokio::test]
    async fn test_add_source_key_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        executor.fail_when("apt-key", &[], 2, "keyserver receive failed");
        let apt = manager(&executor, dir.path());

        let source = AptSource::new("x", "https://example.invalid/", "jammy", "ABCD");
        let err = apt.add_source(&source).await.unwrap_err();

        assert!(matches!(err, PackageError::CommandFailed { status: 2, .. }));
        assert!(!dir.path().join("x.list").exists());
    }

    #[tokio::test]
    async fn test_install_args() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let apt = manager(&executor, dir.path());

        apt.install(&["gitlab-runner"]).await.unwrap();

        let calls = executor.calls_to("apt-get");
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args,
            vec![
                "--assume-yes",
                "--option=Dpkg::Options::=--force-confold",
                "install",
                "gitlab-runner"
            ]
        );
        assert!(
            calls[0]
                .env
                .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()))
        );
    }

    #[tokio::test]
    async fn test_install_with_sudo() {
        let executor = Arc::new(RecordingExecutor::new());
        let apt = AptManager::new(executor.clone(), true);

        apt.install(&["docker.io"]).await.unwrap();

        let calls = executor.calls();
        assert_eq!(calls[0].program, "sudo");
        assert_eq!(
            &calls[0].argv()[..4],
            &["sudo", "DEBIAN_FRONTEND=noninteractive", "apt-get", "--assume-yes"]
        );
        assert!(calls[0].env.is_empty());
    }

    #[tokio::test]
    async fn test_add_source_with_sudo_writes_through_install() {
        let executor = Arc::new(RecordingExecutor::new());
        let apt = AptManager::new(executor.clone(), true);

        let source = AptSource::new("gitlab-runner", "https://example.invalid/", "jammy", "ABCD");
        apt.add_source(&source).await.unwrap();

        let programs: Vec<Vec<String>> = executor
            .calls()
            .iter()
            .map(|c| c.args.iter().take(2).cloned().collect())
            .collect();
        assert_eq!(programs[0], vec!["apt-key", "adv"]);
        assert_eq!(programs[1], vec!["install", "-d"]);
        assert_eq!(programs[2], vec!["install", "-m"]);
        assert_eq!(
            executor.calls()[2].args.last().map(String::as_str),
            Some("/etc/apt/sources.list.d/gitlab-runner.list")
        );
    }

    #[tokio::test]
    async fn test_install_lock_conflict() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.fail_when(
            "apt-get",
            &[],
            100,
            "E: Could not get lock /var/lib/dpkg/lock-frontend",
        );
        let apt = AptManager::new(executor.clone(), false);

        let err = apt.install(&["docker.io"]).await.unwrap_err();
        assert!(matches!(err, PackageError::LockConflict(_)));
    }

    #[tokio::test]
    async fn test_update_failure_is_repository_unavailable() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.fail_when("apt-get", &["update"], 100, "W: something odd");
        let apt = AptManager::new(executor.clone(), false);

        let err = apt.update().await.unwrap_err();
        assert!(matches!(err, PackageError::RepositoryUnavailable(_)));
    }
}
