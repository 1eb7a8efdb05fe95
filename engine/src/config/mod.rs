//! Configuration management
//!
//! This module handles loading, validation, and management of the Sleuth configuration.
//! Configuration is stored in TOML format at ~/.sleuth/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level
//! - **llm**: planner model provider settings
//! - **orchestrator**: iteration/time budgets, question cap, safety patterns
//! - **executor**: shell and per-command timeout
//!
//! Every field has a default, so an empty file (or a file with only some
//! sections) is a valid configuration.
//!
//! # Examples
//!
//! ```no_run
//! use sleuth_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Max iterations: {}", config.orchestrator.max_iterations);
//! println!("Model: {}", config.llm.ollama.model);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::safety::SafetyFilter;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Orchestration loop limits and safety settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Shell command execution settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider used for planning (only "ollama" is built in)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Timeout for each planner call in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Orchestration loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum executed commands per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Wall-clock budget for the loop in milliseconds
    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,

    /// Questions longer than this (in characters) are truncated before prompting
    #[serde(default = "default_max_question_length")]
    pub max_question_length: usize,

    /// Log prompts and planner replies at info level instead of debug
    #[serde(default)]
    pub verbose_logging: bool,

    /// Extra regexes appended to the built-in dangerous command patterns
    #[serde(default)]
    pub dangerous_patterns: Vec<String>,

    /// Characters of each command's output cached in working memory
    #[serde(default = "default_raw_output_limit")]
    pub raw_output_limit: usize,

    /// Treat the task as complete when every discovered list item already has
    /// extracted data, even if the planner says otherwise
    #[serde(default = "default_true")]
    pub coverage_override: bool,
}

/// Shell command execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Shell used to run planner commands (invoked as `<shell> -c <command>`)
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Timeout for each command in seconds
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_max_iterations() -> usize {
    10
}

fn default_max_execution_time_ms() -> u64 {
    60_000
}

fn default_max_question_length() -> usize {
    500
}

fn default_raw_output_limit() -> usize {
    500
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_executor_timeout() -> u64 {
    30
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_llm_timeout(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_execution_time_ms: default_max_execution_time_ms(),
            max_question_length: default_max_question_length(),
            verbose_logging: false,
            dangerous_patterns: Vec::new(),
            raw_output_limit: default_raw_output_limit(),
            coverage_override: true,
        }
    }
}

impl OrchestratorConfig {
    /// Wall-clock budget as a `Duration`
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            timeout_secs: default_executor_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.sleuth/config.toml)
    ///
    /// If the configuration file doesn't exist, writes a default one.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let path = expand_path(path)?;
        let contents = fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.sleuth/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".sleuth").join("config.toml"))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log level or provider is unknown
    /// - A budget or limit is zero
    /// - The model name or shell is empty
    /// - A dangerous pattern does not compile
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama"];
        if !valid_providers.contains(&self.llm.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid provider '{}'. Must be one of: {}",
                self.llm.provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.ollama.model.trim().is_empty() {
            return Err(EngineError::Config("llm.ollama.model must not be empty".to_string()));
        }

        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config("llm.timeout_secs must be greater than 0".to_string()));
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.max_iterations == 0 {
            return Err(EngineError::Config(
                "orchestrator.max_iterations must be greater than 0".to_string(),
            ));
        }
        if orchestrator.max_question_length == 0 {
            return Err(EngineError::Config(
                "orchestrator.max_question_length must be greater than 0".to_string(),
            ));
        }
        if orchestrator.raw_output_limit == 0 {
            return Err(EngineError::Config(
                "orchestrator.raw_output_limit must be greater than 0".to_string(),
            ));
        }

        // Compile once here so a typo fails at startup, not mid-run
        SafetyFilter::new()?.extend(&orchestrator.dangerous_patterns)?;

        if self.executor.shell.trim().is_empty() {
            return Err(EngineError::Config("executor.shell must not be empty".to_string()));
        }
        if self.executor.timeout_secs == 0 {
            return Err(EngineError::Config(
                "executor.timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
