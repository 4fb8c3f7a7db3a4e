//! In-memory transport
//!
//! [`pair`] connects a [`LoopbackTransport`] to a [`LoopbackDevice`] that
//! plays the keyboard side: it receives reassembled commands and pushes
//! reports back. Dropping the device and every [`LoopbackHandle`] closes
//! the report stream, which the correlation manager sees as a disconnect.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::framing::{self, Command, Message, REPORT_SIZE};
use crate::types::TransportDeviceInfo;
use crate::{ReportReceiver, Transport};

/// Host side of an in-memory device
pub struct LoopbackTransport {
    info: TransportDeviceInfo,
    written: mpsc::UnboundedSender<Vec<u8>>,
}

/// Device side of an in-memory device
pub struct LoopbackDevice {
    written: mpsc::UnboundedReceiver<Vec<u8>>,
    partial: Vec<Message>,
    handle: LoopbackHandle,
}

/// Cloneable sender of device-to-host reports
#[derive(Clone)]
pub struct LoopbackHandle {
    reports: mpsc::Sender<[u8; REPORT_SIZE]>,
}

/// Create a connected transport/device pair
pub fn pair(info: TransportDeviceInfo) -> (LoopbackTransport, ReportReceiver, LoopbackDevice) {
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let (reports_tx, reports_rx) = mpsc::channel(256);
    (
        LoopbackTransport {
            info,
            written: written_tx,
        },
        reports_rx,
        LoopbackDevice {
            written: written_rx,
            partial: Vec::new(),
            handle: LoopbackHandle {
                reports: reports_tx,
            },
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
        self.written
            .send(report.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    fn device_info(&self) -> &TransportDeviceInfo {
        &self.info
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl LoopbackDevice {
    /// A sender that outlives borrows of the device
    pub fn handle(&self) -> LoopbackHandle {
        self.handle.clone()
    }

    /// Next complete command written by the host; `None` once the host side
    /// is gone
    pub async fn next_command(&mut self) -> Option<Command> {
        loop {
            let written = self.written.recv().await?;
            let mut bytes = [0u8; REPORT_SIZE];
            let len = written.len().min(REPORT_SIZE);
            bytes[..len].copy_from_slice(&written[..len]);
            let Ok(message) = framing::parse(&bytes) else {
                continue;
            };

            let total = message.total_packets as usize;
            self.partial.push(message);
            if self.partial.len() < total {
                continue;
            }

            let mut messages = std::mem::take(&mut self.partial);
            messages.sort_by_key(|m| m.packet_number);
            let (cmd, call_id) = (messages[0].cmd, messages[0].call_id);
            return Some(Command::new(
                cmd,
                call_id,
                messages.into_iter().flat_map(|m| m.payload).collect::<Vec<u8>>(),
            ));
        }
    }

    /// Send a framed message to the host
    pub async fn reply(&self, cmd: u8, call_id: u16, payload: &[u8]) -> Result<(), TransportError> {
        self.handle.send(cmd, call_id, payload).await
    }
}

impl LoopbackHandle {
    /// Send a framed message to the host
    pub async fn send(&self, cmd: u8, call_id: u16, payload: &[u8]) -> Result<(), TransportError> {
        for report in framing::serialize(&Command::new(cmd, call_id, payload.to_vec()))? {
            self.send_report(report.to_bytes()).await?;
        }
        Ok(())
    }

    /// Send one raw report to the host
    pub async fn send_report(&self, report: [u8; REPORT_SIZE]) -> Result<(), TransportError> {
        self.reports
            .send(report)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}
