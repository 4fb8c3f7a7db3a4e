//! typestat daemon and CLI
//!
//! Tracks typing statistics of QMK keyboards over their raw-HID interface.

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use typestat::config::Config;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path);

    // RUST_LOG, then --log-level, then the config file
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match dispatch(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli, config: Config) -> commands::CommandResult {
    let database = cli.database.as_deref();

    match cli.command {
        // Default: run the daemon
        None => commands::run::run(&config, database, false).await,
        Some(Commands::Run { dry_run }) => commands::run::run(&config, database, dry_run).await,
        Some(Commands::Devices) => commands::devices::devices(&config).await,
        Some(Commands::Keymap { keyboard, layer }) => {
            commands::keymap::keymap(&config, keyboard.as_deref(), layer).await
        }
        Some(Commands::Stats { keyboard, top }) => {
            commands::stats::stats(&config, database, keyboard.as_deref(), top)
        }
    }
}
