//! Example: answer one question with a local Ollama model
//!
//! Prerequisites:
//! - Ollama must be installed and running (https://ollama.ai)
//! - A model must be pulled (e.g., `ollama pull llama3.1:8b`)
//!
//! Run with: cargo run --example ask_ollama -- "which systemd units failed?"

use std::sync::Arc;
use std::time::Duration;

use sleuth_engine::command_executor::ShellExecutor;
use sleuth_engine::config::OrchestratorConfig;
use sleuth_engine::llm::ollama::OllamaProvider;
use sleuth_engine::orchestrator::{LlmPlanner, Orchestrator, SystemContext};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sleuth_engine::telemetry::init_telemetry_with_level("info");

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "how long has this machine been up?".to_string());

    let timeout = Duration::from_secs(120);
    let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b", timeout)?;
    let planner = LlmPlanner::new(Arc::new(provider), timeout).with_verbose(true);

    let config = OrchestratorConfig {
        max_iterations: 5,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(Arc::new(planner), Arc::new(ShellExecutor::new()), config)?;

    let system = SystemContext::detect();
    println!("Asking about {}: {}\n", system.describe(), question);

    let result = orchestrator
        .orchestrate(&question, system, CancellationToken::new())
        .await;

    for entry in &result.results {
        println!("$ {}", entry.command);
        if let Some(error) = &entry.error {
            println!("  ({})", error);
        }
    }

    println!("\nOutcome: {:?}", result.outcome);
    match result.direct_answer {
        Some(answer) => println!("Answer: {}", answer),
        None => println!("No answer: {}", result.error.unwrap_or_default()),
    }

    Ok(())
}
