//! Provisioning and registration state machines
//!
//! Provisioning only moves forward, one step at a time. Registration moves
//! between `Unregistered`, `Registered` and `Blocked` through
//! [`RegistrationState::apply`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How far one-shot host setup has progressed
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    /// Nothing installed yet
    #[default]
    Uninstalled,
    /// Runner package installed
    RuntimeInstalled,
    /// Container engine installed and running
    EngineInstalled,
    /// Executor scripts rendered and hypervisor initialized
    FullyProvisioned,
}

impl ProvisionStage {
    /// The stage after this one, if any
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            ProvisionStage::Uninstalled => Some(ProvisionStage::RuntimeInstalled),
            ProvisionStage::RuntimeInstalled => Some(ProvisionStage::EngineInstalled),
            ProvisionStage::EngineInstalled => Some(ProvisionStage::FullyProvisioned),
            ProvisionStage::FullyProvisioned => None,
        }
    }

    /// Check if transition to target stage is valid
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    /// Move to `target`, which must be the next stage
    ///
    /// # Errors
    /// Returns `CoreError::InvalidTransition` for skips and regressions
    pub fn advance_to(self, target: Self) -> Result<Self, CoreError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    /// Runner package is installed
    #[must_use]
    pub fn installed(self) -> bool {
        self >= ProvisionStage::RuntimeInstalled
    }

    /// Container engine is installed
    #[must_use]
    pub fn docker_installed(self) -> bool {
        self >= ProvisionStage::EngineInstalled
    }

    /// Executor scripts are in place
    #[must_use]
    pub fn scripts_installed(self) -> bool {
        self == ProvisionStage::FullyProvisioned
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisionStage::Uninstalled => "uninstalled",
            ProvisionStage::RuntimeInstalled => "runtime_installed",
            ProvisionStage::EngineInstalled => "engine_installed",
            ProvisionStage::FullyProvisioned => "fully_provisioned",
        };
        write!(f, "{s}")
    }
}

/// Whether the runner is registered with the CI server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    #[default]
    Unregistered,
    Registered,
    /// Registration was attempted without credentials
    Blocked,
}

/// Outcome fed into the registration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// All registration calls succeeded
    Registered,
    /// Registration declined for lack of credentials
    CredentialsMissing,
    /// All registrations were removed
    Unregistered,
}

impl fmt::Display for RegistrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationEvent::Registered => "registered",
            RegistrationEvent::CredentialsMissing => "credentials_missing",
            RegistrationEvent::Unregistered => "unregistered",
        };
        write!(f, "{s}")
    }
}

impl RegistrationState {
    /// Apply an event and return the new state
    ///
    /// # Errors
    /// Returns `CoreError::InvalidRegistration` when registering an already
    /// registered runner, or declaring credentials missing while registered
    pub fn apply(self, event: RegistrationEvent) -> Result<Self, CoreError> {
        use RegistrationEvent as E;
        use RegistrationState as S;

        match (self, event) {
            (S::Unregistered | S::Blocked, E::Registered) => Ok(S::Registered),
            (S::Unregistered | S::Blocked, E::CredentialsMissing) => Ok(S::Blocked),
            (_, E::Unregistered) => Ok(S::Unregistered),
            (S::Registered, E::Registered | E::CredentialsMissing) => {
                Err(CoreError::InvalidRegistration {
                    from: self,
                    event: event.to_string(),
                })
            }
        }
    }

    #[must_use]
    pub fn is_registered(self) -> bool {
        self == RegistrationState::Registered
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registered => "registered",
            RegistrationState::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_moves_one_step_at_a_time() {
        let stage = ProvisionStage::Uninstalled;
        assert!(stage.can_transition_to(ProvisionStage::RuntimeInstalled));
        assert!(!stage.can_transition_to(ProvisionStage::EngineInstalled));

        let stage = stage.advance_to(ProvisionStage::RuntimeInstalled).unwrap();
        let stage = stage.advance_to(ProvisionStage::EngineInstalled).unwrap();
        let stage = stage.advance_to(ProvisionStage::FullyProvisioned).unwrap();
        assert_eq!(stage.next(), None);
    }

    #[test]
    fn test_provisioning_rejects_skips_and_regressions() {
        let err = ProvisionStage::Uninstalled
            .advance_to(ProvisionStage::FullyProvisioned)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        assert!(
            ProvisionStage::EngineInstalled
                .advance_to(ProvisionStage::RuntimeInstalled)
                .is_err()
        );
    }

    #[test]
    fn test_derived_flags() {
        assert!(!ProvisionStage::Uninstalled.installed());
        assert!(ProvisionStage::RuntimeInstalled.installed());
        assert!(!ProvisionStage::RuntimeInstalled.docker_installed());
        assert!(ProvisionStage::EngineInstalled.docker_installed());
        assert!(!ProvisionStage::EngineInstalled.scripts_installed());
        assert!(ProvisionStage::FullyProvisioned.scripts_installed());
    }

    #[test]
    fn test_registration_transitions() {
        let s = RegistrationState::Unregistered;
        let s = s.apply(RegistrationEvent::CredentialsMissing).unwrap();
        assert_eq!(s, RegistrationState::Blocked);

        let s = s.apply(RegistrationEvent::Registered).unwrap();
        assert!(s.is_registered());

        let s = s.apply(RegistrationEvent::Unregistered).unwrap();
        assert_eq!(s, RegistrationState::Unregistered);

        // unregistering is always allowed
        assert_eq!(
            RegistrationState::Blocked
                .apply(RegistrationEvent::Unregistered)
                .unwrap(),
            RegistrationState::Unregistered
        );
    }

    #[test]
    fn test_double_registration_rejected() {
        let err = RegistrationState::Registered
            .apply(RegistrationEvent::Registered)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRegistration { .. }));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ProvisionStage::EngineInstalled).unwrap();
        assert_eq!(json, "\"engine_installed\"");
        let back: RegistrationState = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(back, RegistrationState::Blocked);
    }
}
