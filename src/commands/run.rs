//! The tracking daemon.

use super::{open_database, CommandResult};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use typestat::config::Config;
use typestat::session::KeyboardSession;
use typestat::store::{spawn_writer, MemoryStore, UsageStore};
use typestat_transport::{DeviceDiscovery, HidDiscovery};

/// Track every configured keyboard until Ctrl-C
pub async fn run(config: &Config, database: Option<&Path>, dry_run: bool) -> CommandResult {
    let store: Arc<dyn UsageStore> = if dry_run {
        info!("Dry run: statistics are kept in memory and discarded on exit");
        Arc::new(MemoryStore::new())
    } else {
        let path = config.database_path(database);
        info!("Database: {}", path.display());
        Arc::new(open_database(&path)?)
    };
    let (store_handle, writer) = spawn_writer(store);

    let discovery: Arc<dyn DeviceDiscovery> = Arc::new(HidDiscovery::new());
    let mut sessions = JoinSet::new();
    for keyboard in &config.keyboards {
        info!("Tracking \"{}\" at {}", keyboard.name, keyboard.selector());
        if keyboard.finger_map.is_empty() {
            warn!(
                "\"{}\" has no finger_map; hand and finger usage will not be tracked",
                keyboard.name
            );
        }
        let session = KeyboardSession::new(
            keyboard.clone(),
            discovery.clone(),
            store_handle.clone(),
            config.poll_interval(),
        );
        sessions.spawn(async move { session.run().await });
    }
    // the writer stops once the last session releases its handle
    drop(store_handle);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    sessions.shutdown().await;
    writer.await.context("Store writer panicked")?;
    Ok(())
}
