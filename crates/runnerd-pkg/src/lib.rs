//! runnerd-pkg: Package, service and host management
//!
//! Provides traits and implementations for the system package manager (apt),
//! the service manager (systemd) and a few host administration commands.

pub mod apt;
pub mod error;
pub mod host;
pub mod systemd;
pub mod traits;
pub mod types;

pub use apt::AptManager;
pub use error::PackageError;
pub use host::HostTools;
pub use systemd::SystemdManager;
pub use traits::{PackageManager, ServiceManager};
pub use types::{AptSource, ServiceAction};
