//! Error types for runnerd-exec

use thiserror::Error;

/// Errors that can occur while running an external command
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Command exited with a non-zero status
    #[error("command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        /// Redacted command line
        command: String,
        /// Exit status code (-1 when killed by a signal)
        status: i32,
        /// Stderr output
        stderr: String,
    },

    /// Process spawn error
    #[error("failed to spawn `{command}`: {reason}")]
    SpawnError {
        /// Redacted command line
        command: String,
        /// Underlying OS error
        reason: String,
    },

    /// I/O error while collecting output
    #[error("I/O error: {0}")]
    IoError(String),
}

impl ExecError {
    /// Exit status, if the command ran to completion
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
