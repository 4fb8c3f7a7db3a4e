//! hidapi transport for the raw-HID interface

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hidapi::HidDevice;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::framing::{REPORT_ID, REPORT_SIZE, WRITE_REPORT_SIZE};
use crate::protocol::timing;
use crate::types::TransportDeviceInfo;
use crate::{ReportReceiver, Transport};

/// Inbound report queue depth between reader thread and pump
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// HID transport for one keyboard's raw-HID interface
///
/// The interface is opened twice: one handle for writes, one owned by a
/// dedicated reader thread. Reports read by the thread are forwarded on the
/// [`ReportReceiver`] returned from [`HidTransport::new`]; the channel closes
/// when the device goes away.
pub struct HidTransport {
    /// Write handle
    device: Mutex<HidDevice>,
    /// Device information
    info: TransportDeviceInfo,
    /// Shutdown flag for the reader thread
    shutdown: Arc<AtomicBool>,
}

impl HidTransport {
    /// Create a transport from two handles to the same interface
    pub fn new(
        write_device: HidDevice,
        read_device: HidDevice,
        info: TransportDeviceInfo,
    ) -> Result<(Self, ReportReceiver), TransportError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let shutdown_clone = shutdown.clone();
        let name = format!("hid-reader-{:04x}:{:04x}", info.vid, info.pid);

        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_report_reader_loop(read_device, tx, shutdown_clone, &name))
            .map_err(|e| TransportError::Internal(format!("Failed to spawn HID reader: {e}")))?;

        info!(
            "Opened raw HID transport for {:04X}:{:04X} ({})",
            info.vid, info.pid, info.device_path
        );

        Ok((
            Self {
                device: Mutex::new(write_device),
                info,
                shutdown,
            },
            rx,
        ))
    }
}

impl Drop for HidTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for HidTransport {
    async fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
        if report.len() != WRITE_REPORT_SIZE {
            return Err(TransportError::Internal(format!(
                "Report must be {} bytes, got {}",
                WRITE_REPORT_SIZE,
                report.len()
            )));
        }
        trace!("Writing report: {:02X?}", &report[..8]);
        let written = self.device.lock().write(report)?;
        if written < report.len() {
            warn!("Short HID write: {} of {} bytes", written, report.len());
        }
        Ok(())
    }

    fn device_info(&self) -> &TransportDeviceInfo {
        &self.info
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Bring a raw read into the 32-byte report layout.
///
/// Backends that strip report ID 0 deliver 31 bytes; those are re-prefixed.
pub fn normalize_report(data: &[u8]) -> Option<[u8; REPORT_SIZE]> {
    let mut report = [0u8; REPORT_SIZE];
    match data.len() {
        REPORT_SIZE => report.copy_from_slice(data),
        n if n == REPORT_SIZE - 1 => {
            report[0] = REPORT_ID;
            report[1..].copy_from_slice(data);
        }
        _ => return None,
    }
    Some(report)
}

/// Reader loop: forwards reports until shutdown, device removal or the
/// consumer going away.
///
/// Dropping `tx` on exit is how the consumer learns the device is gone.
fn run_report_reader_loop(
    device: HidDevice,
    tx: mpsc::Sender<[u8; REPORT_SIZE]>,
    shutdown: Arc<AtomicBool>,
    name: &str,
) {
    debug!("{} started", name);
    let mut buf = [0u8; 64];

    while !shutdown.load(Ordering::Relaxed) {
        // short timeout only bounds how often the shutdown flag is checked
        match device.read_timeout(&mut buf, timing::READ_TIMEOUT_MS) {
            Ok(0) => {}
            Ok(len) => match normalize_report(&buf[..len]) {
                Some(report) => {
                    if tx.blocking_send(report).is_err() {
                        debug!("{}: consumer closed", name);
                        break;
                    }
                }
                None => warn!("{}: dropping {}-byte read", name, len),
            },
            Err(e) => {
                info!("{}: device removed ({})", name, e);
                break;
            }
        }
    }

    debug!("{} exiting", name);
}
