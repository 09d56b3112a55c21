//! runnerd agent
//!
//! Installs, configures and registers a GitLab runner on this host. Each
//! subcommand delivers one lifecycle event to the agent actor; `watch` keeps
//! running and turns config file edits into `config-changed` events.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use kameo::actor::{ActorRef, Spawn};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use runnerd_core::{
    AgentActor, AgentActorArgs, AgentEvent, ConfigChanged, DesiredConfig, FirstActivation,
    GetStatus, PeerCredentialsAvailable, PeerDeparted, ReconcileReport, RegisterAction, Secret,
    UnregisterAction, UpgradeAction, reply,
};

mod config;
mod factory;
mod watch;

use config::{Config, LogConfig};
use watch::ConfigWatch;

#[derive(Parser)]
#[command(name = "runnerd", version)]
#[command(about = "GitLab runner host agent", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the host and register if credentials are configured
    Install,
    /// Apply the current configuration file
    ConfigChanged,
    /// Registration credentials arrived from a peer
    PeerAvailable {
        /// CI server URL
        #[arg(long)]
        uri: String,
        /// Registration token
        #[arg(long, env = "RUNNERD_PEER_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// The credentials peer went away
    PeerDeparted,
    /// Register the runner now
    Register,
    /// Remove all runner registrations
    Unregister,
    /// Reinstall the runner package
    Upgrade,
    /// Print agent status as JSON
    Status,
    /// Provision, then re-apply whenever the config file changes
    Watch {
        /// Seconds between config file checks
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
}

fn init_tracing(log: &LogConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    if json || log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn print_report(report: &ReconcileReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let (config, source) = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.log, cli.json);

    match &source {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => warn!("no config file found, using defaults"),
    }

    let (engine, mut events) = factory::local_engine(config.agent.clone()).await?;
    let last_applied = engine.store().last_config()?;

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let AgentEvent::StatusChanged { kind, message } = event {
                tracing::debug!(%kind, %message, "status event");
            }
        }
    });

    let actor = AgentActor::spawn(AgentActorArgs {
        engine,
        desired: config.runner.clone(),
    });

    let outcome = dispatch(cli.command, &actor, config, source, last_applied).await;
    if actor.stop_gracefully().await.is_err() {
        warn!("agent actor already stopped");
    }
    outcome
}

async fn dispatch(
    command: Commands,
    actor: &ActorRef<AgentActor>,
    config: Config,
    source: Option<PathBuf>,
    last_applied: Option<DesiredConfig>,
) -> Result<()> {
    match command {
        Commands::Install => print_report(&reply(actor.ask(FirstActivation).await)?),
        Commands::ConfigChanged => {
            let report = reply(
                actor
                    .ask(ConfigChanged {
                        desired: config.runner,
                    })
                    .await,
            )?;
            print_report(&report)
        }
        Commands::PeerAvailable { uri, token } => {
            let report = reply(
                actor
                    .ask(PeerCredentialsAvailable {
                        uri,
                        token: Secret::new(token),
                    })
                    .await,
            )?;
            print_report(&report)
        }
        Commands::PeerDeparted => print_report(&reply(actor.ask(PeerDeparted).await)?),
        Commands::Register => print_report(&reply(actor.ask(RegisterAction).await)?),
        Commands::Unregister => print_report(&reply(actor.ask(UnregisterAction).await)?),
        Commands::Upgrade => print_report(&reply(actor.ask(UpgradeAction).await)?),
        Commands::Status => {
            let status = reply(actor.ask(GetStatus).await)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Watch { interval } => watch(actor, config, source, last_applied, interval).await,
    }
}

/// Run the first activation, then poll the config file for changes
async fn watch(
    actor: &ActorRef<AgentActor>,
    config: Config,
    source: Option<PathBuf>,
    last_applied: Option<DesiredConfig>,
    interval: u64,
) -> Result<()> {
    let report = if last_applied.as_ref() == Some(&config.runner) {
        reply(actor.ask(FirstActivation).await)?
    } else {
        reply(
            actor
                .ask(ConfigChanged {
                    desired: config.runner.clone(),
                })
                .await,
        )?
    };
    info!(steps = ?report.steps, "initial reconcile done");

    let Some(path) = source else {
        warn!("no config file to watch, exiting");
        return Ok(());
    };

    let mut watch = ConfigWatch::new(path, config.runner);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        match watch.poll(actor).await {
            Ok(Some(report)) => info!(steps = ?report.steps, "reconcile done"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "reconcile failed, retrying on next check"),
        }
    }
}
