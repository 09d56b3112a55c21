//! Structured command lines
//!
//! Commands are passed to executors as a program plus an argument vector, never
//! through a shell. Arguments carrying secrets can be marked so that the
//! `Display` form used in logs and errors never reveals them.

use std::fmt;

use serde::{Deserialize, Serialize};

const REDACTED: &str = "***";

/// A program invocation: program, arguments and extra environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    /// Program to execute (looked up in `PATH` when not absolute)
    pub program: String,
    /// Arguments in order
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Indices into `args` that must not be logged
    #[serde(default)]
    secret_args: Vec<usize>,
}

impl CommandLine {
    /// Create a command line for `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            secret_args: Vec::new(),
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an argument that is redacted in the display form
    #[must_use]
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for the child process
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Prefix the command with `sudo` when `use_sudo` is set
    ///
    /// sudo resets the environment, so extra variables move onto the command
    /// line as `sudo KEY=value program ...`.
    #[must_use]
    pub fn with_sudo(self, use_sudo: bool) -> Self {
        if !use_sudo {
            return self;
        }

        let shift = self.env.len() + 1;
        let mut args = Vec::with_capacity(self.args.len() + shift);
        args.extend(self.env.into_iter().map(|(k, v)| format!("{k}={v}")));
        args.push(self.program);
        args.extend(self.args);

        Self {
            program: "sudo".to_string(),
            args,
            env: Vec::new(),
            secret_args: self.secret_args.into_iter().map(|i| i + shift).collect(),
        }
    }

    /// Program followed by its arguments, unredacted
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Whether the argument at `index` is marked secret
    #[must_use]
    pub fn is_secret(&self, index: usize) -> bool {
        self.secret_args.contains(&index)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.is_secret(i) {
                write!(f, " {REDACTED}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
