//! Core error types for runnerd-core

use thiserror::Error;

use runnerd_exec::ExecError;
use runnerd_pkg::PackageError;

use crate::state::{ProvisionStage, RegistrationState};

/// Errors that can occur while reconciling the host
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Server URI or registration token is missing
    #[error("missing registration token or server URI")]
    MissingCredentials,

    /// Provisioning step attempted out of order
    #[error("invalid provisioning transition from {from} to {to}")]
    InvalidTransition {
        /// Current stage
        from: ProvisionStage,
        /// Attempted target stage
        to: ProvisionStage,
    },

    /// Registration transition that the state machine does not allow
    #[error("invalid registration transition from {from} on {event}")]
    InvalidRegistration {
        /// Current registration state
        from: RegistrationState,
        /// Event that was applied
        event: String,
    },

    /// External command failed
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Package manager operation failed
    #[error("package manager error: {0}")]
    PackageError(String),

    /// Service manager operation failed
    #[error("service error: {0}")]
    ServiceError(String),

    /// Persistent state could not be read or written
    #[error("state store error: {0}")]
    StoreError(String),

    /// Executor script could not be written
    #[error("template error: {0}")]
    TemplateError(String),

    /// Runner configuration file could not be rewritten
    #[error("runner config error: {0}")]
    RunnerConfigError(String),

    /// Invalid desired configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),
}

impl CoreError {
    /// Whether the error means "waiting for input" rather than a failure
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, CoreError::MissingCredentials)
    }
}

impl From<ExecError> for CoreError {
    fn from(err: ExecError) -> Self {
        CoreError::CommandFailed(err.to_string())
    }
}

impl From<PackageError> for CoreError {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::ServiceFailed { .. } => CoreError::ServiceError(err.to_string()),
            other => CoreError::PackageError(other.to_string()),
        }
    }
}
