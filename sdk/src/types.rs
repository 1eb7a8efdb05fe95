//! Command and orchestration result types

use serde::{Deserialize, Serialize};

/// Error text recorded for commands stopped by the safety filter
pub const BLOCKED_BY_SECURITY: &str = "blocked by security";

/// Raw output of one executed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Combined stdout/stderr text
    pub output: String,

    /// Whether the command exited successfully
    pub success: bool,
}

impl CommandOutput {
    /// Create a successful output
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    /// Create an output for a command that exited with a failure status
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

/// Record of one command the orchestrator attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// True when the command never reached the executor
    #[serde(default)]
    pub skipped: bool,
}

impl CommandResult {
    /// Result of a command that ran
    pub fn executed(command: impl Into<String>, output: &CommandOutput) -> Self {
        Self {
            command: command.into(),
            output: Some(output.output.clone()),
            error: (!output.success).then(|| "command exited with a failure status".to_string()),
            skipped: false,
        }
    }

    /// Result of a command the executor could not run at all
    pub fn failed(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: None,
            error: Some(error.into()),
            skipped: false,
        }
    }

    /// Result of a command stopped by the safety filter
    pub fn blocked(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: None,
            error: Some(BLOCKED_BY_SECURITY.to_string()),
            skipped: true,
        }
    }
}

/// How an orchestration run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The planner judged the question answered
    Completed,

    /// Iteration or time budget ran out; answer synthesized from partial data
    BudgetExhausted,

    /// The planner had no further commands to suggest
    PlannerExhausted,

    /// The initial plan could not be obtained
    PlanningFailed,

    /// The caller cancelled the run
    Cancelled,
}

impl Outcome {
    /// Whether the caller received a synthesized answer
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Outcome::Completed | Outcome::BudgetExhausted | Outcome::PlannerExhausted
        )
    }
}

/// Structured result returned to callers of `orchestrate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub outcome: Outcome,
    pub question: String,
    pub direct_answer: Option<String>,
    pub executed_commands: Vec<String>,
    pub results: Vec<CommandResult>,
    pub iterations: usize,
    pub duration_ms: u64,
    pub ai_calls: usize,
    pub blocked_commands: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
