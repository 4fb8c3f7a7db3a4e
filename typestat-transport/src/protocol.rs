//! Protocol constants for the typestat raw-HID keyboard protocol

/// Command bytes (first header byte after the report ID)
pub mod cmd {
    /// Query number of layers and matrix dimensions (3-byte reply)
    pub const GET_LAYER_METADATA: u8 = 0x01;
    /// Dump every keycode of every layer
    pub const GET_LAYERS: u8 = 0x02;
    /// Unsolicited key press/release notification (7-byte payload)
    pub const KEY_EVENT: u8 = 0x03;

    /// Get human-readable name for command byte
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            GET_LAYER_METADATA => "GET_LAYER_METADATA",
            GET_LAYERS => "GET_LAYERS",
            KEY_EVENT => "KEY_EVENT",
            _ => "UNKNOWN",
        }
    }

    /// Commands that are delivered through the notification stream
    /// instead of resolving a pending call.
    pub fn is_notification(cmd: u8) -> bool {
        cmd == KEY_EVENT
    }

    /// Commands this host knows how to route
    pub fn is_known(cmd: u8) -> bool {
        matches!(cmd, GET_LAYER_METADATA | GET_LAYERS | KEY_EVENT)
    }
}

/// Timing constants required by the firmware
pub mod timing {
    /// Delay before and after each chunk write (ms).
    ///
    /// The firmware cannot buffer back-to-back reports; both delays are
    /// required for every chunk.
    pub const PACKET_DELAY_MS: u64 = 10;
    /// Read timeout of the report reader thread (ms); bounds shutdown latency
    pub const READ_TIMEOUT_MS: i32 = 50;
    /// Default interval between device presence polls (ms)
    pub const DEVICE_POLL_MS: u64 = 2000;
}

/// Device defaults for QMK's raw-HID interface
pub mod device {
    /// Raw-HID usage page used by QMK
    pub const RAW_USAGE_PAGE: u16 = 0xFF60;
    /// Raw-HID usage used by QMK
    pub const RAW_USAGE: u16 = 0x61;
}
