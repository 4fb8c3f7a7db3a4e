//! Device listing.

use super::CommandResult;
use typestat::config::Config;
use typestat_transport::{DeviceDiscovery, HidDiscovery};

/// Show each configured keyboard and the matching interfaces present
pub async fn devices(config: &Config) -> CommandResult {
    let discovery = HidDiscovery::new();

    for keyboard in &config.keyboards {
        let selector = keyboard.selector();
        let found = discovery.list_devices(&selector).await?;

        println!("{}  {}", keyboard.name, selector);
        if found.is_empty() {
            println!("  not connected");
        }
        for device in found {
            println!(
                "  {}  {}{}",
                device.info.device_path,
                device.info.product_name.as_deref().unwrap_or("(unnamed)"),
                device
                    .info
                    .serial
                    .as_deref()
                    .map(|s| format!("  serial {s}"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}
