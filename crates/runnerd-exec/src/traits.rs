//! Command executor trait

use async_trait::async_trait;

use crate::command::CommandLine;
use crate::error::ExecError;
use crate::result::CommandResult;

/// Runs external commands to completion
///
/// Implementations block (asynchronously) until the child exits. There is no
/// timeout: a command either finishes or the agent process dies with it.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command and return its result, whatever the exit status
    async fn run(&self, cmd: &CommandLine) -> Result<CommandResult, ExecError>;

    /// Run a command, turning a non-zero exit status into an error
    async fn run_checked(&self, cmd: &CommandLine) -> Result<CommandResult, ExecError> {
        let result = self.run(cmd).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(ExecError::CommandFailed {
                command: cmd.to_string(),
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }

    /// Short name of the executor, for logging
    fn executor_type(&self) -> &'static str;
}
