//! CLI interface for Sleuth
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sleuth diagnostic assistant
///
/// Answers questions about this machine by letting a local language model
/// plan read-only shell commands, running them behind a safety filter, and
/// reasoning over what they print.
#[derive(Parser, Debug)]
#[command(name = "sleuth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a question by running diagnostic commands
    Ask {
        /// The question to answer
        question: String,

        /// Override orchestrator.max_iterations
        #[arg(long, value_name = "N")]
        max_iterations: Option<usize>,

        /// Override orchestrator.max_execution_time_ms
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Log planner prompts and replies
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check whether the safety filter would block a command
    Check {
        /// The shell command to check
        command: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file location
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["sleuth", "check", "rm -rf /"]);
        assert!(matches!(cli.command, Command::Check { .. }));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["sleuth", "--json", "--log", "debug", "config", "path"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_ask_command() {
        let cli = Cli::parse_from([
            "sleuth",
            "ask",
            "how many IPs are blocked by fail2ban",
            "--max-iterations",
            "4",
            "--verbose",
        ]);
        if let Command::Ask {
            question,
            max_iterations,
            timeout_ms,
            verbose,
        } = cli.command
        {
            assert_eq!(question, "how many IPs are blocked by fail2ban");
            assert_eq!(max_iterations, Some(4));
            assert!(timeout_ms.is_none());
            assert!(verbose);
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["sleuth", "config", "show"]);
        if let Command::Config { action } = cli.command {
            assert!(matches!(action, ConfigAction::Show));
        } else {
            panic!("Expected Config command");
        }
    }

    #[test]
    fn test_ask_requires_question() {
        assert!(Cli::try_parse_from(["sleuth", "ask"]).is_err());
    }
}
