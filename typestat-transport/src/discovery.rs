//! Device discovery for raw-HID keyboards

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hidapi::HidApi;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::hid::HidTransport;
use crate::types::{DeviceMatch, DiscoveredDevice, TransportDeviceInfo};
use crate::{ReportReceiver, Transport};

/// An opened device: the write side and the inbound report stream
pub struct OpenedDevice {
    pub transport: Arc<dyn Transport>,
    pub reports: ReportReceiver,
}

/// Device discovery abstraction
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// List currently present interfaces matching `selector`
    async fn list_devices(
        &self,
        selector: &DeviceMatch,
    ) -> Result<Vec<DiscoveredDevice>, TransportError>;

    /// Open a discovered interface
    async fn open_device(&self, device: &DiscoveredDevice) -> Result<OpenedDevice, TransportError>;

    /// First present interface matching `selector`
    async fn find(&self, selector: &DeviceMatch) -> Result<Option<DiscoveredDevice>, TransportError> {
        Ok(self.list_devices(selector).await?.into_iter().next())
    }

    /// Poll every `interval` until a matching interface is present.
    ///
    /// Enumeration errors are logged and polling continues.
    async fn wait_for(&self, selector: &DeviceMatch, interval: Duration) -> DiscoveredDevice {
        let mut announced = false;
        loop {
            match self.find(selector).await {
                Ok(Some(device)) => return device,
                Ok(None) => {
                    if !announced {
                        info!("Waiting for {}", selector);
                        announced = true;
                    }
                }
                Err(e) => warn!("Device enumeration failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// hidapi-backed discovery
#[derive(Debug, Default, Clone, Copy)]
pub struct HidDiscovery;

impl HidDiscovery {
    pub fn new() -> Self {
        Self
    }

    fn api() -> Result<HidApi, TransportError> {
        HidApi::new().map_err(|e| TransportError::HidError(e.to_string()))
    }

    fn matches(selector: &DeviceMatch, device_info: &hidapi::DeviceInfo) -> bool {
        selector.matches(
            device_info.vendor_id(),
            device_info.product_id(),
            device_info.usage_page(),
            device_info.usage(),
        )
    }
}

#[async_trait]
impl DeviceDiscovery for HidDiscovery {
    async fn list_devices(
        &self,
        selector: &DeviceMatch,
    ) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let api = Self::api()?;
        let mut devices = Vec::new();

        for device_info in api.device_list() {
            if !Self::matches(selector, device_info) {
                continue;
            }

            let path = device_info.path().to_string_lossy().to_string();
            debug!(
                "Found device: VID={:04X} PID={:04X} path={}",
                device_info.vendor_id(),
                device_info.product_id(),
                path
            );

            devices.push(DiscoveredDevice {
                info: TransportDeviceInfo {
                    vid: device_info.vendor_id(),
                    pid: device_info.product_id(),
                    device_path: path,
                    serial: device_info.serial_number().map(|s| s.to_string()),
                    product_name: device_info.product_string().map(|s| s.to_string()),
                },
                selector: *selector,
            });
        }

        Ok(devices)
    }

    async fn open_device(&self, device: &DiscoveredDevice) -> Result<OpenedDevice, TransportError> {
        let api = Self::api()?;

        let device_info = api
            .device_list()
            .find(|d| {
                Self::matches(&device.selector, d)
                    && d.path().to_string_lossy() == device.info.device_path
            })
            .ok_or_else(|| {
                TransportError::DeviceNotFound(format!(
                    "{} at {}",
                    device.selector, device.info.device_path
                ))
            })?;

        let write_device = device_info.open_device(&api)?;
        let read_device = device_info.open_device(&api)?;

        let (transport, reports) =
            HidTransport::new(write_device, read_device, device.info.clone())?;

        Ok(OpenedDevice {
            transport: Arc::new(transport),
            reports,
        })
    }
}
