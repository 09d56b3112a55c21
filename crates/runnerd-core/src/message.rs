//! Message types for actor communication
//!
//! Message handlers are implemented in `actor::agent`.

use serde::Serialize;

use crate::config::{DesiredConfig, Secret};
use crate::state::{ProvisionStage, RegistrationState};
use crate::status::WorkloadStatus;

// ============================================================================
// Lifecycle events
// ============================================================================

/// First activation of the agent on this host
#[derive(Debug)]
pub struct FirstActivation;

/// Declared configuration differs from the last one seen
#[derive(Debug)]
pub struct ConfigChanged {
    pub desired: DesiredConfig,
}

/// A peer relation supplied registration credentials
#[derive(Debug)]
pub struct PeerCredentialsAvailable {
    pub uri: String,
    pub token: Secret,
}

/// The peer relation went away
#[derive(Debug)]
pub struct PeerDeparted;

// ============================================================================
// Operator actions
// ============================================================================

/// Register now, failing loudly if credentials are missing
#[derive(Debug)]
pub struct RegisterAction;

/// Remove all registrations
#[derive(Debug)]
pub struct UnregisterAction;

/// Reinstall the runner package from its repository
#[derive(Debug)]
pub struct UpgradeAction;

/// Get a status snapshot
#[derive(Debug)]
pub struct GetStatus;

// ============================================================================
// Replies
// ============================================================================

/// What a reconcile pass did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    InstalledRuntime,
    InstalledEngine,
    InstalledScripts,
    AppliedConfig,
    Registered,
    Unregistered,
    StartedServices,
    StoredPeerCredentials,
    ClearedPeerCredentials,
}

/// Outcome of one event
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Trigger that was handled
    pub trigger: String,
    /// Side-effecting steps, in order
    pub steps: Vec<Step>,
    /// Status after the pass
    pub status: Option<WorkloadStatus>,
}

impl ReconcileReport {
    /// Whether the pass changed nothing
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Agent status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    /// Host name used in runner names
    pub host_name: String,
    /// Provisioning progress
    pub provisioning: ProvisionStage,
    /// Registration state
    pub registration: RegistrationState,
    /// Whether peer-supplied credentials are stored
    pub peer_credentials: bool,
    /// Last published status
    pub status: Option<WorkloadStatus>,
}
