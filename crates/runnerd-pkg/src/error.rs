//! Error types for runnerd-pkg

use thiserror::Error;

use runnerd_exec::ExecError;

/// Errors that can occur during package, service and host operations
#[derive(Error, Debug, Clone)]
pub enum PackageError {
    /// Package not found in repositories
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// Repository is unavailable
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Lock file conflict (another process running)
    #[error("lock file conflict: {0}")]
    LockConflict(String),

    /// Insufficient permissions (need sudo)
    #[error("insufficient permissions: {0}")]
    PermissionDenied(String),

    /// Command execution failed
    #[error("command failed: {status} - {message}")]
    CommandFailed {
        /// Exit status
        status: i32,
        /// Error message
        message: String,
    },

    /// Service manager rejected an action
    #[error("service {action} {service} failed: {message}")]
    ServiceFailed {
        /// Service unit name
        service: String,
        /// Action that was attempted
        action: String,
        /// Error message
        message: String,
    },

    /// Failed to parse command output
    #[error("parse error: {0}")]
    ParseError(String),

    /// Execution error from the command executor
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Local file I/O failed
    #[error("I/O error on {path}: {message}")]
    Io {
        /// File that was being written
        path: String,
        /// Underlying error
        message: String,
    },
}

impl PackageError {
    /// Classify a failed apt invocation from its stderr
    #[must_use]
    pub fn from_apt_failure(status: i32, stderr: &str) -> Self {
        if stderr.contains("Could not get lock") {
            return PackageError::LockConflict(stderr.to_string());
        }
        if stderr.contains("Permission denied") || stderr.contains("are you root?") {
            return PackageError::PermissionDenied(stderr.to_string());
        }
        if stderr.contains("Unable to locate package") {
            return PackageError::PackageNotFound(stderr.to_string());
        }
        if stderr.contains("Failed to fetch") {
            return PackageError::RepositoryUnavailable(stderr.to_string());
        }

        PackageError::CommandFailed {
            status,
            message: stderr.to_string(),
        }
    }
}

impl From<ExecError> for PackageError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::CommandFailed { status, stderr, .. } => PackageError::CommandFailed {
                status,
                message: stderr,
            },
            other => PackageError::ExecutionError(other.to_string()),
        }
    }
}
