//! Common types for transport layer

use std::fmt;

/// Selects one raw-HID interface of one keyboard model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMatch {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// HID usage page of the raw-HID interface
    pub usage_page: u16,
    /// HID usage of the raw-HID interface
    pub usage: u16,
}

impl DeviceMatch {
    /// Check whether an enumerated interface matches
    pub fn matches(&self, vid: u16, pid: u16, usage_page: u16, usage: u16) -> bool {
        self.vendor_id == vid
            && self.product_id == pid
            && self.usage_page == usage_page
            && self.usage == usage
    }
}

impl fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:04X} (usage page 0x{:04X}, usage 0x{:02X})",
            self.vendor_id, self.product_id, self.usage_page, self.usage
        )
    }
}

/// Device identification information
#[derive(Debug, Clone)]
pub struct TransportDeviceInfo {
    /// USB Vendor ID
    pub vid: u16,
    /// USB Product ID
    pub pid: u16,
    /// Device path or identifier (transport-specific)
    pub device_path: String,
    /// Serial number if available
    pub serial: Option<String>,
    /// Product name if available
    pub product_name: Option<String>,
}

/// Discovered device that can be opened
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Device information
    pub info: TransportDeviceInfo,
    /// The match that selected this interface
    pub selector: DeviceMatch,
}
