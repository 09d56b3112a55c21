//! systemd service control

use std::sync::Arc;

use async_trait::async_trait;
use runnerd_exec::{CommandExecutor, CommandLine};
use tracing::{info, instrument};

use crate::error::PackageError;
use crate::traits::ServiceManager;
use crate::types::ServiceAction;

/// Service manager driving `systemctl`
pub struct SystemdManager {
    executor: Arc<dyn CommandExecutor>,
    use_sudo: bool,
}

impl SystemdManager {
    /// Create a new systemd manager
    pub fn new(executor: Arc<dyn CommandExecutor>, use_sudo: bool) -> Self {
        Self { executor, use_sudo }
    }

    async fn systemctl(&self, action: ServiceAction, name: &str) -> Result<(), PackageError> {
        let cmd = CommandLine::new("systemctl")
            .arg(action.to_string())
            .arg(name)
            .with_sudo(self.use_sudo);

        let result = self.executor.run(&cmd).await?;
        if !result.success() {
            return Err(PackageError::ServiceFailed {
                service: name.to_string(),
                action: action.to_string(),
                message: result.stderr.trim().to_string(),
            });
        }

        info!(service = %name, %action, "service action completed");
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for SystemdManager {
    #[instrument(skip(self))]
    async fn enable(&self, name: &str) -> Result<(), PackageError> {
        self.systemctl(ServiceAction::Enable, name).await
    }

    #[instrument(skip(self))]
    async fn start(&self, name: &str) -> Result<(), PackageError> {
        self.systemctl(ServiceAction::Start, name).await
    }
}
