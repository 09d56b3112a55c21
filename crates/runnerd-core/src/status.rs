//! Operator-visible status and agent events

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse workload status, as shown to an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Work in progress
    Maintenance,
    /// Registered and serving jobs
    Active,
    /// Waiting for input a human or peer must supply
    Blocked,
    /// Provisioned but not yet registered
    Waiting,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Maintenance => "maintenance",
            StatusKind::Active => "active",
            StatusKind::Blocked => "blocked",
            StatusKind::Waiting => "waiting",
        };
        write!(f, "{s}")
    }
}

/// Status with a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub kind: StatusKind,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl WorkloadStatus {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Maintenance, message)
    }

    /// `active: Registered with <host>`
    #[must_use]
    pub fn registered(server_uri: &str) -> Self {
        Self::new(
            StatusKind::Active,
            format!("Registered with {}", display_uri(server_uri)),
        )
    }

    #[must_use]
    pub fn missing_credentials() -> Self {
        Self::new(
            StatusKind::Blocked,
            "Unregistered due to missing token or URI",
        )
    }

    #[must_use]
    pub fn unregistered() -> Self {
        Self::new(StatusKind::Waiting, "Runner not registered")
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Strip the scheme from a server URI for display
#[must_use]
pub fn display_uri(uri: &str) -> &str {
    uri.strip_prefix("https://")
        .or_else(|| uri.strip_prefix("http://"))
        .unwrap_or(uri)
}

/// Events broadcast while the agent works
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    StatusChanged {
        kind: StatusKind,
        message: String,
    },
    ProvisioningAdvanced {
        from: String,
        to: String,
    },
    RegistrationChanged {
        from: String,
        to: String,
    },
    ConfigApplied {
        concurrency: u32,
        check_interval: u64,
    },
    ServicesStarted {
        services: Vec<String>,
    },
}
