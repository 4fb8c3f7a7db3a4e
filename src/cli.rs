// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "typestat")]
#[command(author, version, about = "Typing statistics daemon for QMK keyboards")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: ~/.config/typestat/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Database directory (overrides the config file)
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Track every configured keyboard (default)
    Run {
        /// Keep statistics in memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// List configured keyboards and whether they are connected
    #[command(visible_aliases = ["list", "ls"])]
    Devices,

    /// Print a keyboard's keymap as read from the device
    #[command(visible_alias = "km")]
    Keymap {
        /// Keyboard name (default: first configured)
        #[arg(short, long)]
        keyboard: Option<String>,

        /// Only this layer
        #[arg(short, long)]
        layer: Option<u8>,
    },

    /// Print today's statistics from the database
    Stats {
        /// Keyboard name (default: all configured)
        #[arg(short, long)]
        keyboard: Option<String>,

        /// Number of top keys to show
        #[arg(short, long, default_value = "10")]
        top: usize,
    },
}
