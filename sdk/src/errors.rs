//! Error types and handling
//!
//! This module provides the error types used throughout the Sleuth engine.
//! All errors implement the `SleuthErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.

use thiserror::Error;

/// Trait for Sleuth error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait SleuthErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors leave the orchestration loop able to make progress
    /// (a degraded planner reply, a failing command). Non-recoverable errors
    /// end the run.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **LLM Provider**: transport failures, timeouts
/// - **Planning**: the initial plan could not be parsed
/// - **Execution**: a shell command could not be run
/// - **Cancellation**: the caller aborted the run
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, SleuthErrorExt};
///
/// let error = EngineError::ExecutorTimeout { secs: 30 };
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::PlanningFailed("no commands".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid dangerous pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("LLM call timed out")]
    LLMTimeout,

    // Orchestration errors
    #[error("Initial planning failed: {0}")]
    PlanningFailed(String),

    #[error("Orchestration aborted: cancelled by caller")]
    Cancelled,

    // Command execution errors
    #[error("Command execution failed: {0}")]
    Executor(String),

    #[error("Command timed out after {secs}s")]
    ExecutorTimeout { secs: u64 },

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SleuthErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::InvalidPattern { .. } => "Fix the regex in orchestrator.dangerous_patterns",

            Self::LLMProvider(_) => "LLM provider unavailable. Is Ollama running?",
            Self::LLMTimeout => "LLM provider took too long to respond. Try again",

            Self::PlanningFailed(_) => "The model did not return a usable plan. Rephrase the question",
            Self::Cancelled => "The run was cancelled",

            Self::Executor(_) => "A diagnostic command could not be started",
            Self::ExecutorTimeout { .. } => "A diagnostic command ran too long",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::InvalidPattern { .. }
            | Self::PlanningFailed(_)
            | Self::Cancelled => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

impl EngineError {
    /// True when the error is the caller's cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
