//! Transport layer for the typestat raw-HID keyboard protocol
//!
//! ```text
//! [HidTransport / LoopbackTransport]  ← raw 33-byte writes, inbound 32-byte reports
//!        |
//! [CorrelationManager]                ← framing, reassembly, call ids, notification fan-out
//!        |
//! [typed commands]                    ← GetLayerMetadata / GetLayers / RawKeyEvent
//! ```

pub mod command;
pub mod correlation;
pub mod error;
pub mod framing;
pub mod loopback;
pub mod protocol;
pub mod types;

mod discovery;
mod hid;

pub use command::{
    GetLayerMetadata, GetLayers, HidCommand, HidResponse, LayerDecodeMode, LayerDump, LayerMap,
    LayerMetadata, ParseError, RawKeyEvent,
};
pub use correlation::{CorrelationManager, Correlator, Response};
pub use discovery::{DeviceDiscovery, HidDiscovery, OpenedDevice};
pub use error::{FramingError, TransportError};
pub use framing::{Command, Message, RawReport, REPORT_SIZE};
pub use hid::{normalize_report, HidTransport};
pub use types::{DeviceMatch, DiscoveredDevice, TransportDeviceInfo};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Inbound 32-byte reports; closure of the channel signals disconnect
pub type ReportReceiver = mpsc::Receiver<[u8; REPORT_SIZE]>;

/// The raw write side of a device
///
/// Reads are not part of the trait: every backend hands its inbound report
/// stream to the [`CorrelationManager`] as a [`ReportReceiver`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one report (32 report bytes + trailer)
    async fn write_report(&self, report: &[u8]) -> Result<(), TransportError>;

    /// Get device information
    fn device_info(&self) -> &TransportDeviceInfo;

    /// Close the transport gracefully
    async fn close(&self) -> Result<(), TransportError>;
}
