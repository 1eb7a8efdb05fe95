//! Command handlers for CLI operations
//!
//! - ask: run an orchestration and print the answer
//! - check: report what the safety filter says about a command
//! - config show / path: inspect configuration

use anyhow::{Context, Result};
use sdk::types::OrchestrationResult;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::command_executor::ShellExecutor;
use crate::config::Config;
use crate::llm::ollama::OllamaProvider;
use crate::orchestrator::{LlmPlanner, Orchestrator, SafetyFilter, SystemContext};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Per-invocation overrides from `sleuth ask`
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub max_iterations: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub verbose: bool,
}

/// Build the production orchestrator from configuration
pub fn build_orchestrator(config: &Config, options: &AskOptions) -> Result<Orchestrator> {
    let mut orchestrator_config = config.orchestrator.clone();
    if let Some(max_iterations) = options.max_iterations {
        orchestrator_config.max_iterations = max_iterations;
    }
    if let Some(timeout_ms) = options.timeout_ms {
        orchestrator_config.max_execution_time_ms = timeout_ms;
    }
    orchestrator_config.verbose_logging |= options.verbose;

    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let provider = OllamaProvider::new(
        config.llm.ollama.base_url.clone(),
        config.llm.ollama.model.clone(),
        timeout,
    )
    .context("Failed to create Ollama provider")?;

    let planner = LlmPlanner::new(Arc::new(provider), timeout)
        .with_verbose(orchestrator_config.verbose_logging);
    let executor = ShellExecutor::from_config(&config.executor);

    Orchestrator::new(Arc::new(planner), Arc::new(executor), orchestrator_config)
        .context("Failed to build orchestrator")
}

/// Answer a question
///
/// `cancel` is fired by the caller (Ctrl-C in the binary). A run that does
/// not succeed is reported and turned into an error so the process exits
/// non-zero.
pub async fn handle_ask(
    question: String,
    options: AskOptions,
    config: &Config,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<()> {
    let orchestrator = build_orchestrator(config, &options)?;
    let system = SystemContext::detect();

    if let OutputFormat::Text = format {
        println!("Investigating: {}", question);
        println!();
    }

    let result = orchestrator.orchestrate(&question, system, cancel).await;
    print_result(&result, format)?;

    if result.success {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{}",
            result
                .error
                .unwrap_or_else(|| "orchestration did not succeed".to_string())
        ))
    }
}

fn print_result(result: &OrchestrationResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            if let Some(answer) = &result.direct_answer {
                println!("Answer:");
                println!("{}", answer);
                println!();
            }

            if !result.results.is_empty() {
                println!("Commands:");
                for entry in &result.results {
                    let mark = if entry.skipped {
                        "⊘"
                    } else if entry.error.is_some() {
                        "✗"
                    } else {
                        "✓"
                    };
                    println!("  {} {}", mark, entry.command);
                    if let Some(error) = &entry.error {
                        println!("      {}", error);
                    }
                }
                println!();
            }

            if result.success {
                println!("✓ {:?}", result.outcome);
            } else {
                println!(
                    "✗ {:?}: {}",
                    result.outcome,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            println!("  Iterations:    {}", result.iterations);
            println!("  Planner calls: {}", result.ai_calls);
            println!("  Duration:      {}ms", result.duration_ms);
        }
    }
    Ok(())
}

/// Report whether the safety filter blocks a command
pub fn handle_check(command: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let filter = SafetyFilter::new()?.extend(&config.orchestrator.dangerous_patterns)?;
    let pattern = filter.matching_pattern(command);

    match format {
        OutputFormat::Text => match pattern {
            Some(pattern) => println!("✗ blocked (matches {})", pattern),
            None => println!("✓ allowed"),
        },
        OutputFormat::Json => {
            let output = json!({
                "command": command,
                "blocked": pattern.is_some(),
                "pattern": pattern,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
            println!("{}", text);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}

/// Print where configuration is read from
pub fn handle_config_path(custom: Option<&Path>, format: OutputFormat) -> Result<()> {
    let path = match custom {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => {
            println!("{}", json!({ "path": path.display().to_string() }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_applied() {
        let config = Config::default();
        let options = AskOptions {
            max_iterations: Some(2),
            timeout_ms: Some(5_000),
            verbose: true,
        };

        let orchestrator = build_orchestrator(&config, &options).unwrap();
        assert_eq!(orchestrator.config().max_iterations, 2);
        assert_eq!(orchestrator.config().max_execution_time_ms, 5_000);
        assert!(orchestrator.config().verbose_logging);
    }

    #[test]
    fn test_check_handles_both_formats() {
        let config = Config::default();
        assert!(handle_check("rm -rf /", &config, OutputFormat::Text).is_ok());
        assert!(handle_check("uptime", &config, OutputFormat::Json).is_ok());
    }
}
