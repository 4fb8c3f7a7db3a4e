//! Fixed-size report framing
//!
//! Every protocol message travels as one or more 32-byte reports:
//!
//! ```text
//! [report_id=0] [cmd] [call_id hi] [call_id lo] [packet_number] [total_packets] [payload; 26]
//! ```
//!
//! Reports carry no payload length, so a reassembled payload is always a
//! multiple of [`PAYLOAD_SIZE`] bytes with zero padding after the sender's
//! data. Typed decoders only read the bytes they need.
//!
//! Writes append one constant trailer byte (33 bytes on the wire); the
//! trailer is padding demanded by the firmware's fixed report size and has
//! no protocol meaning.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::FramingError;

/// Report ID used for every report
pub const REPORT_ID: u8 = 0;
/// Size of one report as read from the device
pub const REPORT_SIZE: usize = 32;
/// Header bytes before the payload
pub const HEADER_SIZE: usize = 6;
/// Payload bytes per report
pub const PAYLOAD_SIZE: usize = REPORT_SIZE - HEADER_SIZE;
/// Size of one report as written to the device (report + trailer)
pub const WRITE_REPORT_SIZE: usize = REPORT_SIZE + 1;
/// Constant trailer byte appended on write
pub const REPORT_TRAILER: u8 = 0x00;

/// One 32-byte report, laid out exactly as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawReport {
    report_id: u8,
    cmd: u8,
    call_id: [u8; 2],
    packet_number: u8,
    total_packets: u8,
    payload: [u8; PAYLOAD_SIZE],
}

impl RawReport {
    /// Command byte
    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    /// Call ID (big-endian on the wire)
    pub fn call_id(&self) -> u16 {
        u16::from_be_bytes(self.call_id)
    }

    /// Index of this report within its message
    pub fn packet_number(&self) -> u8 {
        self.packet_number
    }

    /// Number of reports making up the message
    pub fn total_packets(&self) -> u8 {
        self.total_packets
    }

    /// Payload bytes (always [`PAYLOAD_SIZE`] long, zero padded)
    pub fn payload(&self) -> &[u8; PAYLOAD_SIZE] {
        &self.payload
    }

    /// The 32 report bytes
    pub fn to_bytes(&self) -> [u8; REPORT_SIZE] {
        zerocopy::transmute!(*self)
    }

    /// The 33 bytes handed to the HID write call
    pub fn to_wire(&self) -> [u8; WRITE_REPORT_SIZE] {
        let mut buf = [REPORT_TRAILER; WRITE_REPORT_SIZE];
        buf[..REPORT_SIZE].copy_from_slice(self.as_bytes());
        buf
    }
}

/// Decoded form of one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cmd: u8,
    pub call_id: u16,
    pub packet_number: u8,
    pub total_packets: u8,
    pub payload: Vec<u8>,
}

/// An outgoing protocol command before chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cmd: u8,
    pub call_id: u16,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(cmd: u8, call_id: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            cmd,
            call_id,
            payload: payload.into(),
        }
    }
}

/// Largest payload that fits the 8-bit packet counter
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize * PAYLOAD_SIZE;

/// Split a command into reports of at most [`PAYLOAD_SIZE`] payload bytes.
///
/// An empty payload still produces one report.
pub fn serialize(command: &Command) -> Result<Vec<RawReport>, FramingError> {
    if command.payload.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge {
            len: command.payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let chunks: Vec<&[u8]> = if command.payload.is_empty() {
        vec![&[][..]]
    } else {
        command.payload.chunks(PAYLOAD_SIZE).collect()
    };
    let total_packets = chunks.len() as u8;

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut payload = [0u8; PAYLOAD_SIZE];
            payload[..chunk.len()].copy_from_slice(chunk);
            RawReport {
                report_id: REPORT_ID,
                cmd: command.cmd,
                call_id: command.call_id.to_be_bytes(),
                packet_number: i as u8,
                total_packets,
                payload,
            }
        })
        .collect())
}

/// Parse one 32-byte report.
///
/// The report ID byte is not validated; some backends deliver it and some
/// strip it before the buffer is normalised by the reader.
pub fn parse(bytes: &[u8; REPORT_SIZE]) -> Result<Message, FramingError> {
    let report: RawReport = zerocopy::transmute!(*bytes);

    if report.total_packets < 1 {
        return Err(FramingError::InvalidTotalPackets(report.total_packets));
    }
    if report.packet_number >= report.total_packets {
        return Err(FramingError::InvalidPacketNumber {
            packet_number: report.packet_number,
            total_packets: report.total_packets,
        });
    }

    Ok(Message {
        cmd: report.cmd,
        call_id: report.call_id(),
        packet_number: report.packet_number,
        total_packets: report.total_packets,
        payload: report.payload.to_vec(),
    })
}
