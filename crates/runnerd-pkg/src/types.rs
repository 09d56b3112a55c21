//! Type definitions for package and service management

use serde::{Deserialize, Serialize};

/// A signed apt repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AptSource {
    /// File stem under `sources.list.d`
    pub name: String,
    /// Full `deb ...` line
    pub line: String,
    /// Signing key fingerprint, fetched from the keyserver
    pub key: String,
}

impl AptSource {
    /// Build a `deb {repository} {codename} main` source
    pub fn new(
        name: impl Into<String>,
        repository: &str,
        codename: &str,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            line: format!("deb {repository} {codename} main"),
            key: key.into(),
        }
    }

    /// File name of the list file
    #[must_use]
    pub fn list_file(&self) -> String {
        format!("{}.list", self.name)
    }
}

/// Action requested from the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Enable,
    Start,
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceAction::Enable => write!(f, "enable"),
            ServiceAction::Start => write!(f, "start"),
        }
    }
}
