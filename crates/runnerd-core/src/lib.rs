//! runnerd-core: reconciliation engine and event dispatch
//!
//! Implements the `Engine` that converges a host toward its declared runner
//! configuration, and the `AgentActor` that feeds it lifecycle events one at
//! a time using kameo.

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod runner;
pub mod runtime_config;
pub mod state;
pub mod status;
pub mod store;
pub mod templates;

pub use actor::{AgentActor, AgentActorArgs, reply};
pub use config::{AgentSettings, DesiredConfig, Secret};
pub use engine::{Engine, EngineDeps, Trigger};
pub use error::CoreError;
pub use message::{
    AgentStatus, ConfigChanged, FirstActivation, GetStatus, PeerCredentialsAvailable,
    PeerDeparted, ReconcileReport, RegisterAction, Step, UnregisterAction, UpgradeAction,
};
pub use runner::{ExecutorMode, RegistrationIdentity, RunnerCli};
pub use state::{ProvisionStage, RegistrationEvent, RegistrationState};
pub use status::{AgentEvent, StatusKind, WorkloadStatus};
pub use store::StateStore;
pub use templates::{ExecutorScript, ScriptRenderer};
