//! Keymap display.

use super::{select_keyboard, CommandResult};
use anyhow::{anyhow, bail, Context};
use std::time::Duration;
use tracing::debug;
use typestat::config::Config;
use typestat_keyboard::{keycode_label, KeyboardError, KeyboardInterface, LayerMap};
use typestat_transport::{CorrelationManager, DeviceDiscovery, HidDiscovery};

/// Upper bound for the metadata + layer dump exchange
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Read the keymap from a connected keyboard and print it
pub async fn keymap(config: &Config, keyboard: Option<&str>, layer: Option<u8>) -> CommandResult {
    let keyboard = select_keyboard(config, keyboard)?;
    let discovery = HidDiscovery::new();
    let found = discovery
        .find(&keyboard.selector())
        .await?
        .ok_or_else(|| anyhow!("\"{}\" is not connected", keyboard.name))?;
    let opened = discovery.open_device(&found).await?;

    let manager = CorrelationManager::start(opened.transport, opened.reports);
    let kb = KeyboardInterface::new(manager.clone());
    let layers = tokio::time::timeout(QUERY_TIMEOUT, fetch(&kb)).await;
    if let Err(e) = manager.close().await {
        debug!("Close failed: {}", e);
    }
    let layers = layers
        .map_err(|_| anyhow!("Keyboard did not answer within {:?}", QUERY_TIMEOUT))?
        .context("Failed to read keymap")?;

    let selected: Vec<usize> = match layer {
        Some(l) if (l as usize) < layers.layers.len() => vec![l as usize],
        Some(l) => bail!("Layer {l} does not exist ({} layers)", layers.layers.len()),
        None => (0..layers.layers.len()).collect(),
    };
    for l in selected {
        println!("Layer {l}:");
        print!("{}", format_layer(&layers.layers[l]));
    }
    Ok(())
}

async fn fetch(kb: &KeyboardInterface) -> Result<LayerMap, KeyboardError> {
    kb.get_layer_metadata().await?;
    kb.get_layers().await
}

/// Render one layer as a grid of labels with equal column widths
fn format_layer(rows: &[Vec<u16>]) -> String {
    let labels: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|&kc| keycode_label(kc)).collect())
        .collect();
    let width = labels.iter().flatten().map(String::len).max().unwrap_or(0);

    let mut out = String::new();
    for row in &labels {
        let cells: Vec<String> = row.iter().map(|l| format!("{l:<width$}")).collect();
        out.push_str("  ");
        out.push_str(cells.join(" ").trim_end());
        out.push('\n');
    }
    out
}
