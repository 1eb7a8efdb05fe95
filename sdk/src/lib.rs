//! Sleuth SDK
//!
//! Shared library providing the error type and the serializable result types
//! of an orchestration run. Used by the engine and by anything consuming its
//! JSON output.

/// Error types and handling
pub mod errors;

/// Command and orchestration result types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, SleuthErrorExt};
pub use types::{CommandOutput, CommandResult, OrchestrationResult, Outcome};
