//! Command execution
//!
//! The orchestrator hands every command that passed the safety filter to an
//! [`Executor`]. [`ShellExecutor`] is the production implementation: it runs
//! the command through a shell because planner commands are pipelines
//! (`fail2ban-client status sshd | grep Banned`), not single programs.
//!
//! # Execution
//! - `<shell> -c <command>`, one command at a time
//! - stdin set to null, stdout and stderr piped
//! - per-command timeout; the child is killed when the timeout fires or the
//!   future is dropped (e.g. on cancellation)

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::CommandOutput;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ExecutorConfig;

/// Runs one diagnostic command and returns its captured output
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` to completion
    ///
    /// A command that starts but exits non-zero is `Ok` with `success == false`;
    /// `Err` means the command could not be run at all.
    async fn run(&self, command: &str) -> Result<CommandOutput, EngineError>;
}

/// Executes commands through a shell on the local host
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    timeout: Duration,
}

impl ShellExecutor {
    /// Creates a ShellExecutor using `sh` and a 30 second timeout
    pub fn new() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }

    /// Creates a ShellExecutor from the `[executor]` config section
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Override the per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput, EngineError> {
        if command.trim().is_empty() {
            return Err(EngineError::Executor("Empty command".to_string()));
        }

        debug!("Executing command via {}: {}", self.shell, command);

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Executor(format!("Failed to start command: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Command failed to complete: {}", e);
                return Err(EngineError::Executor(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Command timed out after {} seconds: {}",
                    self.timeout.as_secs(),
                    command
                );
                return Err(EngineError::ExecutorTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Many diagnostic tools (fail2ban-client among them) report on stderr
        let text = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (false, true) | (true, true) => stdout.into_owned(),
            (true, false) => stderr.into_owned(),
            (false, false) => format!("{}\n{}", stdout.trim_end(), stderr),
        };

        if output.status.success() {
            Ok(CommandOutput::ok(text))
        } else {
            debug!("Command exited with {}", output.status);
            Ok(CommandOutput::failed(text))
        }
    }
}
