// Sleuth diagnostic assistant
// Main entry point for the sleuth binary

use clap::Parser;
use sleuth_engine::cli::{Cli, Command, ConfigAction};
use sleuth_engine::config::Config;
use sleuth_engine::handlers::{
    handle_ask, handle_check, handle_config_path, handle_config_show, AskOptions, OutputFormat,
};
use sleuth_engine::telemetry::init_telemetry_with_level;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the config file; RUST_LOG beats both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::debug!("Sleuth v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Ask {
            question,
            max_iterations,
            timeout_ms,
            verbose,
        } => {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling run");
                    trigger.cancel();
                }
            });

            let options = AskOptions {
                max_iterations,
                timeout_ms,
                verbose,
            };
            handle_ask(question, options, &config, format, cancel).await
        }

        Command::Check { command } => handle_check(&command, &config, format),

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(cli.config.as_deref(), format),
        },
    }
}
