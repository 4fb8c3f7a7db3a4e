//! Transport error types

use thiserror::Error;

use crate::command::ParseError;

/// Structural problems in a single raw report.
///
/// A report that fails framing is corrupt and must be dropped by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Invalid total packet count {0} (must be >= 1)")]
    InvalidTotalPackets(u8),

    #[error("Invalid packet number {packet_number} (total packets {total_packets})")]
    InvalidPacketNumber { packet_number: u8, total_packets: u8 },

    #[error("Payload of {len} bytes exceeds the {max}-byte framing limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Invalid response: expected cmd 0x{expected:02X}, got 0x{actual:02X}")]
    InvalidResponse { expected: u8, actual: u8 },

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Parse error: {0}")]
    Parse(ParseError),

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ParseError> for TransportError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::CommandMismatch { expected, got } => TransportError::InvalidResponse {
                expected,
                actual: got,
            },
            other => TransportError::Parse(other),
        }
    }
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}
