//! Package manager and service manager traits

use async_trait::async_trait;

use crate::error::PackageError;
use crate::types::AptSource;

/// System package manager
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Add a signed package source
    async fn add_source(&self, source: &AptSource) -> Result<(), PackageError>;

    /// Refresh package metadata
    async fn update(&self) -> Result<(), PackageError>;

    /// Install (or upgrade) the named packages
    async fn install(&self, packages: &[&str]) -> Result<(), PackageError>;
}

/// Service manager (systemd and friends)
///
/// Both operations are idempotent in the underlying manager.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Enable a service at boot
    async fn enable(&self, name: &str) -> Result<(), PackageError>;

    /// Start a service now
    async fn start(&self, name: &str) -> Result<(), PackageError>;
}
