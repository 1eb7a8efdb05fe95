//! Sleuth Engine Library
//!
//! This library provides the core functionality of the Sleuth engine.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// LLM provider abstraction layer
pub mod llm;

/// Shell command execution module
pub mod command_executor;

/// Iterative command orchestration
pub mod orchestrator;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
