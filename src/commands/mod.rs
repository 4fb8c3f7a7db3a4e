//! Command handlers for the CLI application.
//!
//! - `run`: the tracking daemon
//! - `devices`: configured keyboards and their presence
//! - `keymap`: keymap read back from a connected keyboard
//! - `stats`: today's counters from the database

pub mod devices;
pub mod keymap;
pub mod run;
pub mod stats;

use anyhow::{anyhow, Context};
use std::path::Path;
use typestat::config::{Config, KeyboardConfig};
use typestat::store::SledStore;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Resolve `--keyboard NAME`, defaulting to the first configured keyboard
pub fn select_keyboard<'a>(
    config: &'a Config,
    name: Option<&str>,
) -> anyhow::Result<&'a KeyboardConfig> {
    match name {
        Some(name) => config.keyboard(name).ok_or_else(|| {
            let known: Vec<&str> = config.keyboards.iter().map(|kb| kb.name.as_str()).collect();
            anyhow!("Unknown keyboard \"{name}\" (configured: {})", known.join(", "))
        }),
        None => config
            .keyboards
            .first()
            .ok_or_else(|| anyhow!("No keyboards configured")),
    }
}

/// Open the sled database, creating it if needed
pub fn open_database(path: &Path) -> anyhow::Result<SledStore> {
    SledStore::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}
