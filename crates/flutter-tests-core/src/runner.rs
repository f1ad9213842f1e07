//! Subprocess seam for the flutter tool.
//!
//! [`CommandRunner`] is the only way the device and integration engines talk
//! to the outside world. [`SystemRunner`] spawns real processes with
//! `tokio::process`; tests swap in a scripted runner.
//!
//! Commands are never passed through a shell. The configured flutter command
//! (for example `fvm flutter`) is split on whitespace into a program and
//! leading arguments by [`FlutterTool`].

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors raised while launching a subprocess.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The program could not be started at all.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process started but waiting on it or reading its output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully-resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Builds a `tokio` command for this invocation.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    /// True if the argument list contains `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The configured flutter executable plus any leading words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlutterTool {
    program: String,
    prefix: Vec<String>,
}

impl FlutterTool {
    /// Splits a command line such as `"fvm flutter"` into program and prefix.
    ///
    /// Returns `None` when `command_line` is blank.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            prefix: words.collect(),
        })
    }

    /// Builds an invocation of this tool with `args` appended.
    pub fn command<I, S>(&self, args: I) -> ToolCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = self.prefix.clone();
        all.extend(args.into_iter().map(Into::into));
        ToolCommand {
            program: self.program.clone(),
            args: all,
        }
    }
}

impl Default for FlutterTool {
    fn default() -> Self {
        Self {
            program: "flutter".to_string(),
            prefix: Vec::new(),
        }
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A finished process with the given exit code and stdout.
    pub fn with_code(code: i32, stdout: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Exit code 0 means success; anything else, including a signal, is failure.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable exit description for report lines.
    pub fn describe_exit(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "a signal".to_string(),
        }
    }
}

/// Executes tool commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion, capturing stdout and stderr.
    async fn output(&self, command: &ToolCommand) -> Result<CommandOutput, RunnerError>;

    /// Starts `command` and returns without waiting for it to finish.
    async fn spawn_detached(&self, command: &ToolCommand) -> Result<(), RunnerError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, command: &ToolCommand) -> Result<CommandOutput, RunnerError> {
        debug!(command = %command, "running");
        let output = command
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RunnerError::Spawn {
                command: command.to_string(),
                source,
            })?;
        debug!(command = %command, code = ?output.status.code(), "finished");

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn_detached(&self, command: &ToolCommand) -> Result<(), RunnerError> {
        debug!(command = %command, "spawning detached");
        command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: command.to_string(),
                source,
            })?;
        Ok(())
    }
}
