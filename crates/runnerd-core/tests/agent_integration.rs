use std::path::Path;
use std::sync::Arc;

use kameo::actor::Spawn;
use tempfile::TempDir;
use tokio::sync::broadcast;

use runnerd_core::*;
use runnerd_exec::{CommandLine, RecordingExecutor};
use runnerd_pkg::{AptManager, HostTools, SystemdManager};

const RUNNER_CONFIG: &str = concat!(
    "concurrent = 1\n",
    "check_interval = 0\n",
    "\n",
    "[session_server]\n",
    "  session_timeout = 1800\n",
);

struct Harness {
    dir: TempDir,
    executor: Arc<RecordingExecutor>,
    settings: AgentSettings,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runner_config = dir.path().join("config.toml");
        std::fs::write(&runner_config, RUNNER_CONFIG).unwrap();

        let settings = AgentSettings {
            state_path: dir.path().join("state.json"),
            runner_config_path: runner_config,
            executor_dir: dir.path().join("lxd-executor"),
            runner_binary: "gitlab-runner".to_string(),
            hostname: Some("H".to_string()),
            distro_codename: Some("jammy".to_string()),
            ..AgentSettings::default()
        };

        Self {
            dir,
            executor: Arc::new(RecordingExecutor::new()),
            settings,
        }
    }

    fn engine(&self) -> Engine {
        let deps = EngineDeps {
            executor: self.executor.clone(),
            packages: Arc::new(
                AptManager::new(self.executor.clone(), false)
                    .with_sources_dir(self.dir.path().join("sources.list.d")),
            ),
            services: Arc::new(SystemdManager::new(self.executor.clone(), false)),
            host: Arc::new(HostTools::new(self.executor.clone(), false)),
        };
        let store = StateStore::open(&self.settings.state_path).unwrap();
        let (event_tx, _) = broadcast::channel(64);
        Engine::new(self.settings.clone(), store, deps, "H", event_tx)
    }

    fn spawn(&self, desired: DesiredConfig) -> kameo::actor::ActorRef<AgentActor> {
        AgentActor::spawn(AgentActorArgs {
            engine: self.engine(),
            desired,
        })
    }

    fn register_calls(&self) -> Vec<CommandLine> {
        self.executor
            .calls_to("gitlab-runner")
            .into_iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("register"))
            .collect()
    }

    fn runner_config(&self) -> String {
        std::fs::read_to_string(&self.settings.runner_config_path).unwrap()
    }
}

fn with_credentials() -> DesiredConfig {
    DesiredConfig::default().with_credentials("https://gitlab.example.com", "glrt-token")
}

fn stored_state(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_first_activation_provisions_and_registers() {
    let h = Harness::new();
    let mut engine = h.engine();

    let report = engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap();

    assert_eq!(
        report.steps,
        vec![
            Step::InstalledRuntime,
            Step::InstalledEngine,
            Step::InstalledScripts,
            Step::AppliedConfig,
            Step::Registered,
            Step::StartedServices,
        ]
    );

    let status = report.status.unwrap();
    assert_eq!(status.kind, StatusKind::Active);
    assert_eq!(status.message, "Registered with gitlab.example.com");

    let snapshot = engine.snapshot().unwrap();
    assert_eq!(snapshot.provisioning, ProvisionStage::FullyProvisioned);
    assert_eq!(snapshot.registration, RegistrationState::Registered);

    // runtime install sequence
    let apt = h.executor.calls_to("apt-get");
    assert_eq!(apt[0].args, vec!["update", "-qq"]);
    assert!(apt[1].args.contains(&"gitlab-runner".to_string()));
    assert!(apt[2].args.contains(&"docker.io".to_string()));
    let list = std::fs::read_to_string(h.dir.path().join("sources.list.d/gitlab-runner.list"))
        .unwrap();
    assert_eq!(
        list,
        "deb https://packages.gitlab.com/runner/gitlab-runner/ubuntu/ jammy main\n"
    );

    // scripts and groups
    for name in ["base.sh", "prepare.sh", "run.sh", "cleanup.sh"] {
        assert!(h.settings.executor_dir.join(name).exists());
    }
    let groups: Vec<String> = h
        .executor
        .calls_to("gpasswd")
        .iter()
        .map(|c| c.args[2].clone())
        .collect();
    assert_eq!(groups, vec!["docker", "lxd"]);
    assert_eq!(h.executor.calls_to("lxd")[0].args, vec!["init", "--auto"]);

    // config rewrite
    assert!(h.runner_config().starts_with("concurrent = 3\ncheck_interval = 0\n"));

    let state = stored_state(&h.settings.state_path);
    assert_eq!(state["apt_key"], "3F01618A51312F3F");
    assert_eq!(state["provisioning"], "fully_provisioned");
    assert_eq!(state["registration"], "registered");
}

#[tokio::test]
async fn test_docker_registration_args() {
    let h = Harness::new();
    let mut engine = h.engine();
    let desired = DesiredConfig::default().with_credentials("U", "T");

    engine
        .reconcile(Trigger::FirstActivation, &desired)
        .await
        .unwrap();

    let registers = h.register_calls();
    assert_eq!(registers.len(), 2);
    assert_eq!(
        registers[0].args,
        vec![
            "register",
            "--non-interactive",
            "--url",
            "U",
            "--registration-token",
            "T",
            "--name",
            "H-docker",
            "--tag-list",
            "docker",
            "--executor",
            "docker",
            "--docker-image",
            "ubuntu:latest",
        ]
    );
    assert_eq!(registers[1].args[7], "H-lxd");
    assert_eq!(registers[1].args[11], "custom");
}

#[tokio::test]
async fn test_second_pass_installs_and_registers_nothing() {
    let h = Harness::new();
    let mut engine = h.engine();
    let desired = with_credentials();

    engine
        .reconcile(Trigger::FirstActivation, &desired)
        .await
        .unwrap();
    h.executor.clear_calls();

    let report = engine
        .reconcile(Trigger::ConfigChanged, &desired)
        .await
        .unwrap();

    assert_eq!(report.steps, vec![Step::StartedServices]);
    assert!(h.executor.calls_to("apt-get").is_empty());
    assert!(h.executor.calls_to("apt-key").is_empty());
    assert!(h.executor.calls_to("lxd").is_empty());
    assert!(h.register_calls().is_empty());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let h = Harness::new();
    h.engine()
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap();
    h.executor.clear_calls();

    // fresh engine over the same state file
    let mut engine = h.engine();
    let report = engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap();

    assert!(!report.steps.contains(&Step::InstalledRuntime));
    assert!(h.register_calls().is_empty());
}

#[tokio::test]
async fn test_missing_credentials_blocks_without_failing_chain() {
    let h = Harness::new();
    let mut engine = h.engine();

    let report = engine
        .reconcile(Trigger::FirstActivation, &DesiredConfig::default())
        .await
        .unwrap();

    assert!(!report.steps.contains(&Step::Registered));
    assert!(h.register_calls().is_empty());

    let status = report.status.unwrap();
    assert_eq!(status.kind, StatusKind::Blocked);
    assert_eq!(status.message, "Unregistered due to missing token or URI");
    assert_eq!(
        engine.snapshot().unwrap().registration,
        RegistrationState::Blocked
    );
}

#[tokio::test]
async fn test_empty_credentials_are_missing() {
    let h = Harness::new();
    let mut engine = h.engine();
    engine
        .reconcile(Trigger::FirstActivation, &DesiredConfig::default())
        .await
        .unwrap();

    let desired = DesiredConfig::default().with_credentials("https://gitlab.example.com", "");
    let err = engine.register(&desired).await.unwrap_err();

    assert!(matches!(err, CoreError::MissingCredentials));
    assert!(h.register_calls().is_empty());
}

#[tokio::test]
async fn test_services_only_started_once_registered() {
    let h = Harness::new();
    let mut engine = h.engine();

    engine
        .reconcile(Trigger::FirstActivation, &DesiredConfig::default())
        .await
        .unwrap();
    h.executor.clear_calls();

    assert!(!engine.ensure_services_running().await.unwrap());
    assert!(h.executor.calls_to("systemctl").is_empty());

    engine
        .reconcile(Trigger::ConfigChanged, &with_credentials())
        .await
        .unwrap();

    let services: Vec<Vec<String>> = h
        .executor
        .calls_to("systemctl")
        .into_iter()
        .map(|c| c.args)
        .collect();
    assert_eq!(
        services,
        vec![
            vec!["enable", "gitlab-runner"],
            vec!["start", "gitlab-runner"],
            vec!["enable", "docker"],
            vec!["start", "docker"],
        ]
    );
}

#[tokio::test]
async fn test_registration_failure_leaves_unregistered() {
    let h = Harness::new();
    h.executor
        .fail_when("gitlab-runner", &["register"], 1, "403 Forbidden");
    let mut engine = h.engine();

    let err = engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::CommandFailed(_)));
    assert!(!err.to_string().contains("glrt-token"));
    let snapshot = engine.snapshot().unwrap();
    assert_eq!(snapshot.registration, RegistrationState::Unregistered);
    // provisioning progress is kept
    assert_eq!(snapshot.provisioning, ProvisionStage::FullyProvisioned);
}

#[tokio::test]
async fn test_support_stack_refuses_before_runtime() {
    let h = Harness::new();
    let mut engine = h.engine();

    let err = engine.ensure_support_stack_installed().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidTransition {
            from: ProvisionStage::Uninstalled,
            ..
        }
    ));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_install_failure_is_retried_next_pass() {
    let h = Harness::new();
    h.executor.fail_when(
        "apt-get",
        &["--assume-yes"],
        100,
        "E: Unable to locate package gitlab-runner",
    );
    let mut engine = h.engine();

    let err = engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PackageError(_)));
    assert_eq!(
        engine.snapshot().unwrap().provisioning,
        ProvisionStage::Uninstalled
    );

    h.executor.clear_rules();
    let report = engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap();
    assert_eq!(report.steps[0], Step::InstalledRuntime);
}

#[tokio::test]
async fn test_unregister_then_register() {
    let h = Harness::new();
    let mut engine = h.engine();
    let desired = with_credentials();

    engine
        .reconcile(Trigger::FirstActivation, &desired)
        .await
        .unwrap();

    engine.unregister().await.unwrap();
    let status = engine.store().status().unwrap().unwrap();
    assert_eq!(status.message, "Runner not registered");
    assert_eq!(
        engine.snapshot().unwrap().registration,
        RegistrationState::Unregistered
    );

    h.executor.clear_calls();
    assert!(engine.register(&desired).await.unwrap());
    assert_eq!(h.register_calls().len(), 2);
    assert!(!engine.register(&desired).await.unwrap());
    assert_eq!(h.register_calls().len(), 2);
}

#[tokio::test]
async fn test_unregister_is_unconditional() {
    let h = Harness::new();
    let mut engine = h.engine();

    engine.unregister().await.unwrap();
    assert_eq!(
        h.executor.calls()[0].argv(),
        vec!["gitlab-runner", "unregister", "--all-runners"]
    );
}

#[tokio::test]
async fn test_peer_credentials_take_precedence() {
    let h = Harness::new();
    let mut engine = h.engine();
    engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap();
    h.executor.clear_calls();

    let report = engine
        .reconcile(
            Trigger::PeerCredentialsAvailable {
                uri: "https://peer.example.com".to_string(),
                token: Secret::new("peer-token"),
            },
            &with_credentials(),
        )
        .await
        .unwrap();

    assert_eq!(
        report.steps,
        vec![
            Step::StoredPeerCredentials,
            Step::Unregistered,
            Step::Registered,
            Step::StartedServices,
        ]
    );

    // registration reset comes before re-registering
    let runner_calls = h.executor.calls_to("gitlab-runner");
    assert_eq!(runner_calls[0].args[0], "unregister");
    assert_eq!(runner_calls[1].args[3], "https://peer.example.com");
    assert_eq!(runner_calls[1].args[5], "peer-token");
    assert_eq!(
        report.status.unwrap().message,
        "Registered with peer.example.com"
    );
}

#[tokio::test]
async fn test_repeated_peer_credentials_keep_registration() {
    let h = Harness::new();
    let mut engine = h.engine();
    let peer = || Trigger::PeerCredentialsAvailable {
        uri: "https://peer.example.com".to_string(),
        token: Secret::new("peer-token"),
    };

    let first = engine.reconcile(peer(), &with_credentials()).await.unwrap();
    assert!(first.steps.contains(&Step::Registered));
    h.executor.clear_calls();

    let second = engine.reconcile(peer(), &with_credentials()).await.unwrap();

    assert!(h.executor.calls_to("gitlab-runner").is_empty());
    assert!(!second.steps.contains(&Step::StoredPeerCredentials));
    assert!(!second.steps.contains(&Step::Unregistered));
    assert!(!second.steps.contains(&Step::Registered));
    assert_eq!(
        engine.snapshot().unwrap().registration,
        RegistrationState::Registered
    );
}

#[tokio::test]
async fn test_partial_registration_retries_every_mode() {
    let h = Harness::new();
    h.executor.fail_when(
        "gitlab-runner",
        &[
            "register",
            "--non-interactive",
            "--url",
            "https://gitlab.example.com",
            "--registration-token",
            "glrt-token",
            "--name",
            "H-lxd",
        ],
        1,
        "500 Internal Server Error",
    );
    let mut engine = h.engine();

    let err = engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CommandFailed(_)));
    assert_eq!(
        engine.snapshot().unwrap().registration,
        RegistrationState::Unregistered
    );

    h.executor.clear_rules();
    let report = engine
        .reconcile(Trigger::ConfigChanged, &with_credentials())
        .await
        .unwrap();
    assert!(report.steps.contains(&Step::Registered));

    let names: Vec<String> = h
        .register_calls()
        .into_iter()
        .map(|c| c.args[7].clone())
        .collect();
    assert_eq!(names, vec!["H-docker", "H-lxd", "H-docker", "H-lxd"]);
}

#[tokio::test]
async fn test_peer_departure_clears_credentials() {
    let h = Harness::new();
    let mut engine = h.engine();
    engine
        .reconcile(
            Trigger::PeerCredentialsAvailable {
                uri: "https://peer.example.com".to_string(),
                token: Secret::new("peer-token"),
            },
            &DesiredConfig::default(),
        )
        .await
        .unwrap();
    assert!(engine.snapshot().unwrap().peer_credentials);

    let report = engine
        .reconcile(Trigger::PeerDeparted, &DesiredConfig::default())
        .await
        .unwrap();

    assert_eq!(
        report.steps,
        vec![Step::ClearedPeerCredentials, Step::Unregistered]
    );
    let snapshot = engine.snapshot().unwrap();
    assert!(!snapshot.peer_credentials);
    assert_eq!(snapshot.registration, RegistrationState::Unregistered);

    let state = stored_state(&h.settings.state_path);
    assert!(state.get("peer_uri").is_none());
    assert!(state.get("peer_token").is_none());
}

#[tokio::test]
async fn test_peer_departure_before_install_skips_runner() {
    let h = Harness::new();
    let mut engine = h.engine();

    engine
        .reconcile(Trigger::PeerDeparted, &DesiredConfig::default())
        .await
        .unwrap();

    assert!(h.executor.calls_to("gitlab-runner").is_empty());
}

#[tokio::test]
async fn test_upgrade_reinstalls_runtime() {
    let h = Harness::new();
    let mut engine = h.engine();
    engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap();
    h.executor.clear_calls();

    let report = engine
        .reconcile(Trigger::Upgrade, &with_credentials())
        .await
        .unwrap();

    assert_eq!(report.steps[0], Step::InstalledRuntime);
    assert_eq!(h.executor.calls_to("apt-key").len(), 1);
    assert_eq!(h.executor.calls_to("apt-get").len(), 2);
    assert!(h.register_calls().is_empty());
    assert_eq!(report.status.unwrap().kind, StatusKind::Active);
}

#[tokio::test]
async fn test_events_are_broadcast() {
    let h = Harness::new();
    let mut engine = h.engine();
    let mut rx = engine.subscribe();

    engine
        .reconcile(Trigger::FirstActivation, &with_credentials())
        .await
        .unwrap();

    let mut registration_changed = false;
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::RegistrationChanged { to, .. } = event {
            registration_changed = to == "registered";
        }
    }
    assert!(registration_changed);
}

// ============================================================================
// Actor
// ============================================================================

#[tokio::test]
async fn test_actor_full_lifecycle() {
    let h = Harness::new();
    let actor = h.spawn(DesiredConfig::default());

    let report = actor.ask(FirstActivation).await.unwrap();
    assert_eq!(report.status.unwrap().kind, StatusKind::Blocked);

    let report = actor
        .ask(ConfigChanged {
            desired: with_credentials(),
        })
        .await
        .unwrap();
    assert!(report.steps.contains(&Step::Registered));

    let status = actor.ask(GetStatus).await.unwrap();
    assert_eq!(status.host_name, "H");
    assert_eq!(status.registration, RegistrationState::Registered);

    let report = actor.ask(UnregisterAction).await.unwrap();
    assert_eq!(report.steps, vec![Step::Unregistered]);

    let report = actor.ask(RegisterAction).await.unwrap();
    assert_eq!(report.steps, vec![Step::Registered, Step::StartedServices]);

    actor.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_actor_register_action_requires_credentials() {
    let h = Harness::new();
    let actor = h.spawn(DesiredConfig::default());
    actor.ask(FirstActivation).await.unwrap();

    let err = reply(actor.ask(RegisterAction).await).unwrap_err();
    assert!(matches!(err, CoreError::MissingCredentials));

    let status = reply(actor.ask(GetStatus).await).unwrap();
    assert_eq!(status.registration, RegistrationState::Blocked);

    actor.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_actor_rejects_invalid_config() {
    let h = Harness::new();
    let actor = h.spawn(DesiredConfig::default());

    let desired = DesiredConfig {
        concurrency: 0,
        ..DesiredConfig::default()
    };
    let err = reply(actor.ask(ConfigChanged { desired }).await).unwrap_err();
    assert!(matches!(err, CoreError::ConfigError(_)));
    assert!(h.executor.calls().is_empty());

    actor.stop_gracefully().await.unwrap();
}
