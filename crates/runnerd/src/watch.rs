//! Config file polling for the `watch` subcommand

use std::path::PathBuf;

use kameo::actor::ActorRef;
use runnerd_core::{AgentActor, ConfigChanged, DesiredConfig, ReconcileReport, reply};
use tracing::{info, warn};

use crate::config::Config;

/// Tracks the last runner config the agent applied successfully
pub struct ConfigWatch {
    path: PathBuf,
    applied: DesiredConfig,
}

impl ConfigWatch {
    pub fn new(path: PathBuf, applied: DesiredConfig) -> Self {
        Self { path, applied }
    }

    #[cfg(test)]
    pub fn applied(&self) -> &DesiredConfig {
        &self.applied
    }

    /// Re-read the file and reconcile if it differs from the applied config
    ///
    /// Returns `Ok(None)` when there is nothing to do. A failed reconcile
    /// leaves the applied config untouched, so the next poll tries again.
    ///
    /// # Errors
    /// Returns error if the reconcile fails
    pub async fn poll(
        &mut self,
        actor: &ActorRef<AgentActor>,
    ) -> eyre::Result<Option<ReconcileReport>> {
        let desired = match Config::load(&self.path) {
            Ok(c) => c.runner,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable config");
                return Ok(None);
            }
        };
        if desired == self.applied {
            return Ok(None);
        }

        info!(path = %self.path.display(), "configuration changed");
        let report = reply(
            actor
                .ask(ConfigChanged {
                    desired: desired.clone(),
                })
                .await,
        )?;
        self.applied = desired;
        Ok(Some(report))
    }
}
