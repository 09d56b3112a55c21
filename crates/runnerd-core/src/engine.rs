//! Reconciliation engine
//!
//! Drives the host toward the declared configuration. Every step checks the
//! persisted state first and records its own completion, so running the whole
//! chain again after success installs and registers nothing. Enabling and
//! starting services is repeated on every pass while registered.

use std::fmt;
use std::sync::Arc;

use runnerd_exec::{CommandExecutor, CommandLine};
use runnerd_pkg::{AptSource, HostTools, PackageManager, ServiceManager};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::{AgentSettings, DesiredConfig, Secret};
use crate::error::CoreError;
use crate::message::{AgentStatus, ReconcileReport, Step};
use crate::runner::{ExecutorMode, RunnerCli};
use crate::runtime_config;
use crate::state::{ProvisionStage, RegistrationEvent};
use crate::status::{AgentEvent, StatusKind, WorkloadStatus};
use crate::store::{StateStore, keys};
use crate::templates::ScriptRenderer;

/// Runner package name
pub const RUNNER_PACKAGE: &str = "gitlab-runner";
/// Container engine package name
pub const ENGINE_PACKAGE: &str = "docker.io";
/// Runner service unit
pub const RUNNER_SERVICE: &str = "gitlab-runner";
/// Container engine service unit
pub const ENGINE_SERVICE: &str = "docker";

/// Event that caused a reconcile pass
#[derive(Debug, Clone)]
pub enum Trigger {
    FirstActivation,
    ConfigChanged,
    PeerCredentialsAvailable { uri: String, token: Secret },
    PeerDeparted,
    ManualRegister,
    ManualUnregister,
    Upgrade,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::FirstActivation => "first_activation",
            Trigger::ConfigChanged => "config_changed",
            Trigger::PeerCredentialsAvailable { .. } => "peer_credentials_available",
            Trigger::PeerDeparted => "peer_departed",
            Trigger::ManualRegister => "manual_register",
            Trigger::ManualUnregister => "manual_unregister",
            Trigger::Upgrade => "upgrade",
        };
        write!(f, "{s}")
    }
}

/// External collaborators the engine drives
#[derive(Clone)]
pub struct EngineDeps {
    pub executor: Arc<dyn CommandExecutor>,
    pub packages: Arc<dyn PackageManager>,
    pub services: Arc<dyn ServiceManager>,
    pub host: Arc<HostTools>,
}

/// The reconciliation engine
pub struct Engine {
    settings: AgentSettings,
    store: StateStore,
    host_name: String,
    executor: Arc<dyn CommandExecutor>,
    packages: Arc<dyn PackageManager>,
    services: Arc<dyn ServiceManager>,
    host: Arc<HostTools>,
    runner: RunnerCli,
    renderer: ScriptRenderer,
    event_tx: broadcast::Sender<AgentEvent>,
}

impl Engine {
    /// Build an engine from already resolved parts
    pub fn new(
        settings: AgentSettings,
        store: StateStore,
        deps: EngineDeps,
        host_name: impl Into<String>,
        event_tx: broadcast::Sender<AgentEvent>,
    ) -> Self {
        let runner = RunnerCli::new(
            deps.executor.clone(),
            settings.runner_binary.clone(),
            settings.use_sudo,
        );
        let renderer = ScriptRenderer::new(
            deps.host.clone(),
            settings.runner_user.clone(),
            settings.runner_user.clone(),
        );

        Self {
            settings,
            store,
            host_name: host_name.into(),
            executor: deps.executor,
            packages: deps.packages,
            services: deps.services,
            host: deps.host,
            runner,
            renderer,
            event_tx,
        }
    }

    /// Open the state store and resolve the host name
    ///
    /// # Errors
    /// Returns an error if the state file is unreadable or the host name
    /// cannot be determined
    pub async fn bootstrap(
        settings: AgentSettings,
        deps: EngineDeps,
        event_tx: broadcast::Sender<AgentEvent>,
    ) -> Result<Self, CoreError> {
        let store = StateStore::open(&settings.state_path)?;

        let host_name = match &settings.hostname {
            Some(name) => name.clone(),
            None => deps.host.hostname().await?,
        };

        info!(host = %host_name, state = %settings.state_path.display(), "engine ready");
        Ok(Self::new(settings, store, deps, host_name, event_tx))
    }

    /// Subscribe to agent events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    #[must_use]
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Executor modes registered for this host, in registration order
    #[must_use]
    pub fn executor_modes(&self) -> Vec<ExecutorMode> {
        vec![
            ExecutorMode::Docker {
                image: self.settings.docker_image.clone(),
            },
            ExecutorMode::Lxd {
                executor_dir: self.settings.executor_dir.clone(),
            },
        ]
    }

    /// Status snapshot
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if persisted state is corrupt
    pub fn snapshot(&self) -> Result<AgentStatus, CoreError> {
        Ok(AgentStatus {
            host_name: self.host_name.clone(),
            provisioning: self.store.provisioning()?,
            registration: self.store.registration()?,
            peer_credentials: self.store.peer_credentials()?.is_some(),
            status: self.store.status()?,
        })
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn set_status(&mut self, status: WorkloadStatus) -> Result<(), CoreError> {
        info!(kind = %status.kind, message = %status.message, "status");
        self.store.set_status(&status)?;
        self.emit(AgentEvent::StatusChanged {
            kind: status.kind,
            message: status.message,
        });
        Ok(())
    }

    fn advance(&mut self, to: ProvisionStage) -> Result<(), CoreError> {
        let from = self.store.provisioning()?;
        let next = from.advance_to(to)?;
        self.store.set_provisioning(next)?;

        info!(%from, to = %next, "provisioning advanced");
        self.emit(AgentEvent::ProvisioningAdvanced {
            from: from.to_string(),
            to: next.to_string(),
        });
        Ok(())
    }

    fn transition_registration(&mut self, event: RegistrationEvent) -> Result<(), CoreError> {
        let from = self.store.registration()?;
        let to = from.apply(event)?;
        self.store.set_registration(to)?;

        if from != to {
            info!(%from, %to, "registration changed");
            self.emit(AgentEvent::RegistrationChanged {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// Credentials to register with: peer-supplied first, then config
    fn credentials(&self, desired: &DesiredConfig) -> Result<Option<(String, Secret)>, CoreError> {
        if let Some(peer) = self.store.peer_credentials()? {
            return Ok(Some(peer));
        }

        Ok(match (&desired.server_uri, &desired.token) {
            (Some(uri), Some(token)) if !uri.is_empty() && !token.is_empty() => {
                Some((uri.clone(), token.clone()))
            }
            _ => None,
        })
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// Add the runner repository, refresh and install the runner package
    async fn install_runtime(&mut self) -> Result<(), CoreError> {
        let codename = match &self.settings.distro_codename {
            Some(c) => c.clone(),
            None => self.host.distro_codename().await?,
        };

        let source = AptSource::new(
            RUNNER_PACKAGE,
            &self.settings.apt_repository,
            &codename,
            self.settings.apt_key.clone(),
        );
        self.packages.add_source(&source).await?;
        self.store.set(keys::APT_KEY, &source.key)?;

        self.packages.update().await?;
        self.packages.install(&[RUNNER_PACKAGE]).await?;
        Ok(())
    }

    /// Install the runner package once
    ///
    /// Returns whether anything was done.
    ///
    /// # Errors
    /// Propagates the first package manager failure
    #[instrument(skip(self))]
    pub async fn ensure_runtime_installed(&mut self) -> Result<bool, CoreError> {
        if self.store.provisioning()?.installed() {
            debug!("runtime already installed");
            return Ok(false);
        }

        self.set_status(WorkloadStatus::maintenance("Installing GitLab Runner"))?;
        self.install_runtime().await?;
        self.advance(ProvisionStage::RuntimeInstalled)?;
        Ok(true)
    }

    /// Install the container engine and the LXD executor scripts once each
    ///
    /// Returns the steps that were performed.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidTransition` if the runtime is not installed
    /// yet, otherwise propagates the first failure
    #[instrument(skip(self))]
    pub async fn ensure_support_stack_installed(&mut self) -> Result<Vec<Step>, CoreError> {
        let stage = self.store.provisioning()?;
        if !stage.installed() {
            return Err(CoreError::InvalidTransition {
                from: stage,
                to: ProvisionStage::EngineInstalled,
            });
        }

        let mut steps = Vec::new();
        let user = self.settings.runner_user.clone();

        if !stage.docker_installed() {
            self.set_status(WorkloadStatus::maintenance("Installing Docker"))?;
            self.packages.install(&[ENGINE_PACKAGE]).await?;
            self.host.add_user_to_group(&user, "docker").await?;
            self.services.enable(ENGINE_SERVICE).await?;
            self.services.start(ENGINE_SERVICE).await?;
            self.advance(ProvisionStage::EngineInstalled)?;
            steps.push(Step::InstalledEngine);
        }

        if !self.store.provisioning()?.scripts_installed() {
            self.set_status(WorkloadStatus::maintenance("Setting up LXD executor"))?;
            let dir = self.settings.executor_dir.clone();
            self.renderer.render_all(&dir).await?;
            self.host.add_user_to_group(&user, "lxd").await?;

            let init = CommandLine::new("lxd")
                .args(["init", "--auto"])
                .with_sudo(self.settings.use_sudo);
            self.executor.run_checked(&init).await?;

            self.advance(ProvisionStage::FullyProvisioned)?;
            steps.push(Step::InstalledScripts);
        }

        Ok(steps)
    }

    /// Rewrite `concurrent` and `check_interval` in the runner config
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` for invalid values, or
    /// `CoreError::RunnerConfigError` if the file cannot be replaced
    #[instrument(skip_all)]
    pub async fn apply_config(&mut self, desired: &DesiredConfig) -> Result<bool, CoreError> {
        desired.validate()?;

        let changed = runtime_config::apply_to_file(
            &self.host,
            &self.settings.runner_config_path,
            desired.concurrency,
            desired.check_interval,
        )
        .await?;

        if changed {
            self.emit(AgentEvent::ConfigApplied {
                concurrency: desired.concurrency,
                check_interval: desired.check_interval,
            });
        }
        Ok(changed)
    }

    /// Register every executor mode with the CI server
    ///
    /// Returns `Ok(false)` if already registered.
    ///
    /// # Errors
    /// Returns `CoreError::MissingCredentials` (and moves to `Blocked`) when
    /// the URI or token is missing, or the first registration failure
    #[instrument(skip_all)]
    pub async fn register(&mut self, desired: &DesiredConfig) -> Result<bool, CoreError> {
        if self.store.registration()?.is_registered() {
            debug!("already registered, nothing to do");
            return Ok(false);
        }

        let Some((uri, token)) = self.credentials(desired)? else {
            warn!("could not register runner due to missing token or URI");
            self.transition_registration(RegistrationEvent::CredentialsMissing)?;
            self.set_status(WorkloadStatus::missing_credentials())?;
            return Err(CoreError::MissingCredentials);
        };

        info!(server = %uri, "registering runner");
        self.set_status(WorkloadStatus::maintenance("Registering with GitLab"))?;

        let mut completed: Vec<&'static str> = Vec::new();
        for mode in self.executor_modes() {
            if let Err(e) = self
                .runner
                .register(&uri, &token, &self.host_name, &mode)
                .await
            {
                if !completed.is_empty() {
                    // The CI server keeps these; the next successful pass
                    // registers every mode again.
                    warn!(
                        succeeded = ?completed,
                        failed = mode.tag(),
                        "registration partially applied"
                    );
                }
                return Err(e);
            }
            completed.push(mode.tag());
        }

        self.transition_registration(RegistrationEvent::Registered)?;
        self.set_status(WorkloadStatus::registered(&uri))?;
        Ok(true)
    }

    /// Remove every registration; always leaves the runner unregistered
    ///
    /// # Errors
    /// Returns `CoreError::CommandFailed` if the runner exits non-zero
    #[instrument(skip(self))]
    pub async fn unregister(&mut self) -> Result<(), CoreError> {
        self.runner.unregister_all().await?;
        self.transition_registration(RegistrationEvent::Unregistered)?;
        self.set_status(WorkloadStatus::unregistered())?;
        Ok(())
    }

    /// Enable and start runner and engine services, only once registered
    ///
    /// # Errors
    /// Propagates the first service manager failure
    #[instrument(skip(self))]
    pub async fn ensure_services_running(&mut self) -> Result<bool, CoreError> {
        if !self.store.registration()?.is_registered() {
            debug!("not registered, leaving services alone");
            return Ok(false);
        }

        let services = [RUNNER_SERVICE, ENGINE_SERVICE];
        for service in services {
            self.services.enable(service).await?;
            self.services.start(service).await?;
        }

        self.emit(AgentEvent::ServicesStarted {
            services: services.iter().map(ToString::to_string).collect(),
        });
        Ok(true)
    }

    /// Reinstall the runner package regardless of the install guard
    ///
    /// # Errors
    /// Propagates the first package manager or config failure
    #[instrument(skip_all)]
    pub async fn upgrade(&mut self, desired: &DesiredConfig) -> Result<Vec<Step>, CoreError> {
        self.set_status(WorkloadStatus::maintenance("Upgrading GitLab Runner"))?;
        self.install_runtime().await?;

        if !self.store.provisioning()?.installed() {
            self.advance(ProvisionStage::RuntimeInstalled)?;
        }

        let mut steps = vec![Step::InstalledRuntime];
        if self.apply_config(desired).await? {
            steps.push(Step::AppliedConfig);
        }
        if self.ensure_services_running().await? {
            steps.push(Step::StartedServices);
        }

        self.restore_resting_status(desired)?;
        Ok(steps)
    }

    /// Status to show once work is finished
    fn restore_resting_status(&mut self, desired: &DesiredConfig) -> Result<(), CoreError> {
        let status = if self.store.registration()?.is_registered() {
            match self.credentials(desired)? {
                Some((uri, _)) => WorkloadStatus::registered(&uri),
                None => WorkloadStatus::new(StatusKind::Active, "Registered"),
            }
        } else if self.credentials(desired)?.is_none() {
            WorkloadStatus::missing_credentials()
        } else {
            WorkloadStatus::unregistered()
        };
        self.set_status(status)
    }

    // ------------------------------------------------------------------
    // Chains
    // ------------------------------------------------------------------

    /// Install, configure, register and start, in dependency order
    ///
    /// With `reset_registration`, existing registrations are removed after
    /// provisioning so the runner registers again with current credentials.
    async fn run_chain(
        &mut self,
        desired: &DesiredConfig,
        reset_registration: bool,
        steps: &mut Vec<Step>,
    ) -> Result<(), CoreError> {
        desired.validate()?;

        if self.ensure_runtime_installed().await? {
            steps.push(Step::InstalledRuntime);
        }
        steps.extend(self.ensure_support_stack_installed().await?);

        if reset_registration {
            self.unregister().await?;
            steps.push(Step::Unregistered);
        }

        if self.apply_config(desired).await? {
            steps.push(Step::AppliedConfig);
        }

        match self.register(desired).await {
            Ok(true) => steps.push(Step::Registered),
            Ok(false) => {}
            Err(e) if e.is_blocking() => {
                info!("registration blocked until credentials are supplied");
            }
            Err(e) => return Err(e),
        }

        if self.ensure_services_running().await? {
            steps.push(Step::StartedServices);
        }

        self.store.set_last_config(desired)?;
        Ok(())
    }

    /// Handle one trigger
    ///
    /// # Errors
    /// Missing credentials only fail the manual register action; any other
    /// failure propagates from the step that raised it
    #[instrument(skip(self, trigger, desired), fields(trigger = %trigger))]
    pub async fn reconcile(
        &mut self,
        trigger: Trigger,
        desired: &DesiredConfig,
    ) -> Result<ReconcileReport, CoreError> {
        let trigger_name = trigger.to_string();
        let mut steps = Vec::new();

        match trigger {
            Trigger::FirstActivation | Trigger::ConfigChanged => {
                self.run_chain(desired, false, &mut steps).await?;
            }
            Trigger::PeerCredentialsAvailable { uri, token } => {
                info!(server = %uri, "credentials received from peer");
                // the same pair again leaves a live registration alone
                let unchanged = self.store.registration()?.is_registered()
                    && self
                        .store
                        .peer_credentials()?
                        .is_some_and(|(u, t)| u == uri && t == token);
                if !unchanged {
                    self.store.set_peer_credentials(&uri, &token)?;
                    steps.push(Step::StoredPeerCredentials);
                }
                self.run_chain(desired, !unchanged, &mut steps).await?;
            }
            Trigger::PeerDeparted => {
                self.store.clear_peer_credentials()?;
                steps.push(Step::ClearedPeerCredentials);

                if self.store.provisioning()?.installed() {
                    self.unregister().await?;
                } else {
                    // Nothing can be registered without the runner binary.
                    self.transition_registration(RegistrationEvent::Unregistered)?;
                    self.set_status(WorkloadStatus::unregistered())?;
                }
                steps.push(Step::Unregistered);
            }
            Trigger::ManualRegister => {
                if self.register(desired).await? {
                    steps.push(Step::Registered);
                }
                if self.ensure_services_running().await? {
                    steps.push(Step::StartedServices);
                }
            }
            Trigger::ManualUnregister => {
                self.unregister().await?;
                steps.push(Step::Unregistered);
            }
            Trigger::Upgrade => {
                steps = self.upgrade(desired).await?;
            }
        }

        let report = ReconcileReport {
            trigger: trigger_name,
            steps,
            status: self.store.status()?,
        };

        info!(steps = ?report.steps, "reconcile finished");
        Ok(report)
    }
}
