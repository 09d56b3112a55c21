//! Wires the local executor, package tooling and engine together

use std::sync::Arc;

use eyre::Result;
use runnerd_core::{AgentEvent, AgentSettings, Engine, EngineDeps};
use runnerd_exec::{CommandExecutor, LocalExecutor};
use runnerd_pkg::{AptManager, HostTools, SystemdManager};
use tokio::sync::broadcast;

/// Capacity of the agent event channel
const EVENT_CAPACITY: usize = 64;

/// Build engine dependencies around one executor
pub fn deps(executor: Arc<dyn CommandExecutor>, use_sudo: bool) -> EngineDeps {
    EngineDeps {
        packages: Arc::new(AptManager::new(executor.clone(), use_sudo)),
        services: Arc::new(SystemdManager::new(executor.clone(), use_sudo)),
        host: Arc::new(HostTools::new(executor.clone(), use_sudo)),
        executor,
    }
}

/// Build an engine that runs commands on this host
///
/// # Errors
/// Returns error if the state store cannot be opened or the host name cannot
/// be resolved
pub async fn local_engine(
    settings: AgentSettings,
) -> Result<(Engine, broadcast::Receiver<AgentEvent>)> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(LocalExecutor::new());
    tracing::debug!(executor = executor.executor_type(), "using executor");

    let (event_tx, event_rx) = broadcast::channel(EVENT_CAPACITY);
    let deps = deps(executor, settings.use_sudo);
    let engine = Engine::bootstrap(settings, deps, event_tx).await?;
    Ok((engine, event_rx))
}
