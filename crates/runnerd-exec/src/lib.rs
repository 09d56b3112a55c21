//! runnerd-exec: External command execution
//!
//! Provides the `CommandExecutor` trait, a local implementation backed by
//! `tokio::process`, and a recording executor for tests.

pub mod command;
pub mod error;
pub mod local;
pub mod recording;
pub mod result;
pub mod traits;

pub use command::CommandLine;
pub use error::ExecError;
pub use local::LocalExecutor;
pub use recording::RecordingExecutor;
pub use result::CommandResult;
pub use traits::CommandExecutor;
