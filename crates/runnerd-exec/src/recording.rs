//! Recording executor for tests
//!
//! Records every command it is asked to run and answers from a list of
//! scripted responses, so callers can be exercised without spawning processes.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::command::CommandLine;
use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::CommandExecutor;

/// A scripted response, matched on program and leading arguments
#[derive(Debug, Clone)]
struct Rule {
    program: String,
    args_prefix: Vec<String>,
    response: CommandResult,
}

impl Rule {
    fn matches(&self, cmd: &CommandLine) -> bool {
        cmd.program == self.program
            && cmd.args.len() >= self.args_prefix.len()
            && cmd.args.iter().zip(&self.args_prefix).all(|(a, p)| a == p)
    }
}

/// Executor that records invocations instead of running them
///
/// Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandLine>>,
    rules: Mutex<Vec<Rule>>,
}

impl RecordingExecutor {
    /// Create an executor where every command succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `program args_prefix..` with `response`
    ///
    /// Earlier rules take precedence.
    pub fn respond(&self, program: &str, args_prefix: &[&str], response: CommandResult) {
        let rule = Rule {
            program: program.to_string(),
            args_prefix: args_prefix.iter().map(ToString::to_string).collect(),
            response,
        };
        self.rules.lock().unwrap_or_else(|e| e.into_inner()).push(rule);
    }

    /// Make matching commands exit with `status` and `stderr`
    pub fn fail_when(&self, program: &str, args_prefix: &[&str], status: i32, stderr: &str) {
        self.respond(program, args_prefix, CommandResult::failed(status, stderr));
    }

    /// Drop all scripted responses
    pub fn clear_rules(&self) {
        self.rules.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// All recorded invocations, in order
    #[must_use]
    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded invocations of `program`
    #[must_use]
    pub fn calls_to(&self, program: &str) -> Vec<CommandLine> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    /// Forget recorded invocations
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, cmd: &CommandLine) -> Result<CommandResult, ExecError> {
        debug!(command = %cmd, "recording command");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.clone());

        let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let response = rules
            .iter()
            .find(|r| r.matches(cmd))
            .map_or_else(|| CommandResult::ok(""), |r| r.response.clone());

        Ok(response)
    }

    fn executor_type(&self) -> &'static str {
        "recording"
    }
}
