//! Typed command builders and response parsers
//!
//! The protocol has three exchanges:
//!
//! - `GET_LAYER_METADATA` → [`LayerMetadata`] (3 bytes)
//! - `GET_LAYERS` → [`LayerDump`], decoded into a [`LayerMap`] with the
//!   dimensions from a previous metadata reply
//! - `KEY_EVENT` notification → [`RawKeyEvent`] (7 bytes)

use std::fmt;

use tracing::warn;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::correlation::Response;
use crate::protocol::cmd;

// =============================================================================
// Core Traits
// =============================================================================

/// A command that can be sent through the correlation manager
pub trait HidCommand {
    /// Command byte
    const CMD: u8;

    /// Serialize the payload (excluding header)
    fn to_payload(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// A reply or notification that can be decoded from a completed response
pub trait HidResponse: Sized {
    /// Command byte the response must carry
    const CMD: u8;

    /// Minimum payload length required
    const MIN_LEN: usize;

    /// Decode from payload bytes (length already validated)
    fn from_payload(payload: &[u8]) -> Result<Self, ParseError>;

    /// Decode with command and length validation
    fn parse(response: &Response) -> Result<Self, ParseError> {
        if response.cmd != Self::CMD {
            return Err(ParseError::CommandMismatch {
                expected: Self::CMD,
                got: response.cmd,
            });
        }
        if response.payload.len() < Self::MIN_LEN {
            return Err(ParseError::TooShort {
                expected: Self::MIN_LEN,
                got: response.payload.len(),
            });
        }
        Self::from_payload(&response.payload)
    }
}

/// Parse error for responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    TooShort { expected: usize, got: usize },
    CommandMismatch { expected: u8, got: u8 },
    ShortLayerMap { expected: usize, got: usize },
    EmptyDimensions { layers: u8, rows: u8, cols: u8 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { expected, got } => {
                write!(
                    f,
                    "Response too short: expected {} bytes, got {}",
                    expected, got
                )
            }
            Self::CommandMismatch { expected, got } => {
                write!(
                    f,
                    "Command mismatch: expected 0x{:02X}, got 0x{:02X}",
                    expected, got
                )
            }
            Self::ShortLayerMap { expected, got } => {
                write!(
                    f,
                    "Layer map too short: expected {} bytes, got {}",
                    expected, got
                )
            }
            Self::EmptyDimensions { layers, rows, cols } => {
                write!(
                    f,
                    "Invalid layer metadata: {} layers, {}x{} matrix",
                    layers, rows, cols
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}

// =============================================================================
// Layer metadata
// =============================================================================

/// GET_LAYER_METADATA (0x01): empty payload
#[derive(Debug, Clone, Copy, Default)]
pub struct GetLayerMetadata;

impl HidCommand for GetLayerMetadata {
    const CMD: u8 = cmd::GET_LAYER_METADATA;
}

/// Number of layers and matrix dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMetadata {
    pub number_of_layers: u8,
    pub matrix_rows: u8,
    pub matrix_cols: u8,
}

impl LayerMetadata {
    /// Keycode cells across all layers
    pub fn cells(&self) -> usize {
        self.number_of_layers as usize * self.matrix_rows as usize * self.matrix_cols as usize
    }

    /// Bytes a full layer dump occupies (2 per cell)
    pub fn layer_map_len(&self) -> usize {
        self.cells() * 2
    }
}

impl HidResponse for LayerMetadata {
    const CMD: u8 = cmd::GET_LAYER_METADATA;
    const MIN_LEN: usize = 3;

    /// Rejects zero counts: report padding turns a truncated reply into
    /// trailing zeros that would otherwise pass the length check.
    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let (layers, rows, cols) = (payload[0], payload[1], payload[2]);
        if layers == 0 || rows == 0 || cols == 0 {
            return Err(ParseError::EmptyDimensions { layers, rows, cols });
        }
        Ok(Self {
            number_of_layers: layers,
            matrix_rows: rows,
            matrix_cols: cols,
        })
    }
}

// =============================================================================
// Layer dump
// =============================================================================

/// GET_LAYERS (0x02): empty payload
#[derive(Debug, Clone, Copy, Default)]
pub struct GetLayers;

impl HidCommand for GetLayers {
    const CMD: u8 = cmd::GET_LAYERS;
}

/// Undecoded GET_LAYERS reply; needs [`LayerMetadata`] to become a [`LayerMap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDump {
    pub bytes: Vec<u8>,
}

impl HidResponse for LayerDump {
    const CMD: u8 = cmd::GET_LAYERS;
    const MIN_LEN: usize = 0;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            bytes: payload.to_vec(),
        })
    }
}

/// How to treat a layer dump shorter than the declared dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerDecodeMode {
    /// Keep whatever was received; the final layer may be partially filled
    #[default]
    Lenient,
    /// Reject short dumps with [`ParseError::ShortLayerMap`]
    Strict,
}

/// Keycodes indexed `[layer][row][col]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerMap {
    pub metadata: LayerMetadata,
    pub layers: Vec<Vec<Vec<u16>>>,
}

impl LayerMap {
    /// Decode a layer dump.
    ///
    /// Cells are big-endian keycodes, row-major within a layer and
    /// layer-major overall. Bytes past the declared dimensions (report
    /// padding) are ignored.
    ///
    /// Strict mode rejects a dump shorter than the declared dimensions.
    /// Reassembly pads payloads to whole reports, so a dump missing only
    /// cells that fall inside the final report's padding still passes and
    /// those cells decode as `KC_NO` (`0x0000`).
    pub fn decode(
        metadata: LayerMetadata,
        dump: &LayerDump,
        mode: LayerDecodeMode,
    ) -> Result<Self, ParseError> {
        let expected = metadata.layer_map_len();
        let got = dump.bytes.len();
        if got < expected {
            if mode == LayerDecodeMode::Strict {
                return Err(ParseError::ShortLayerMap { expected, got });
            }
            warn!(expected, got, "Layer dump shorter than declared dimensions");
        }

        let rows = metadata.matrix_rows as usize;
        let cols = metadata.matrix_cols as usize;
        let count = metadata.number_of_layers as usize;

        if rows == 0 || cols == 0 {
            return Ok(Self {
                metadata,
                layers: vec![vec![Vec::new(); rows]; count],
            });
        }

        let mut layers = Vec::with_capacity(count);
        let mut layer: Vec<Vec<u16>> = Vec::with_capacity(rows);
        let mut row: Vec<u16> = Vec::with_capacity(cols);

        for pair in dump.bytes[..expected.min(got)].chunks_exact(2) {
            row.push(u16::from_be_bytes([pair[0], pair[1]]));
            if row.len() == cols {
                layer.push(std::mem::replace(&mut row, Vec::with_capacity(cols)));
                if layer.len() == rows {
                    layers.push(std::mem::replace(&mut layer, Vec::with_capacity(rows)));
                }
            }
        }
        if !row.is_empty() {
            layer.push(row);
        }
        if !layer.is_empty() {
            layers.push(layer);
        }

        Ok(Self { metadata, layers })
    }

    /// Keycode at a matrix position, if it was received
    pub fn keycode(&self, layer: u8, row: u8, col: u8) -> Option<u16> {
        self.layers
            .get(layer as usize)?
            .get(row as usize)?
            .get(col as usize)
            .copied()
    }

    /// Every received cell as `(layer, row, col, keycode)`
    pub fn cells(&self) -> impl Iterator<Item = (u8, u8, u8, u16)> + '_ {
        self.layers.iter().enumerate().flat_map(|(l, rows)| {
            rows.iter().enumerate().flat_map(move |(r, cols)| {
                cols.iter()
                    .enumerate()
                    .map(move |(c, &kc)| (l as u8, r as u8, c as u8, kc))
            })
        })
    }

    /// Keycodes as unpadded upper-case hex strings (`0x0004` → `"4"`)
    pub fn hex_layers(&self) -> Vec<Vec<Vec<String>>> {
        self.layers
            .iter()
            .map(|rows| {
                rows.iter()
                    .map(|cols| cols.iter().map(|kc| format!("{kc:X}")).collect())
                    .collect()
            })
            .collect()
    }
}

// =============================================================================
// Key event notification
// =============================================================================

/// Size of a key event payload
pub const KEY_EVENT_LEN: usize = 7;

/// KEY_EVENT wire layout
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct KeyEventData {
    keycode: [u8; 2],
    col: u8,
    row: u8,
    pressed: u8,
    mods: u8,
    layer: u8,
}

/// Physical key transition reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub keycode: u16,
    pub col: u8,
    pub row: u8,
    pub pressed: bool,
    /// HID modifier bitfield held at the time of the event
    pub mods: u8,
    /// Highest active layer at the time of the event
    pub layer: u8,
}

impl RawKeyEvent {
    /// Encode to the 7-byte notification payload
    pub fn to_payload(&self) -> Vec<u8> {
        KeyEventData {
            keycode: self.keycode.to_be_bytes(),
            col: self.col,
            row: self.row,
            pressed: u8::from(self.pressed),
            mods: self.mods,
            layer: self.layer,
        }
        .as_bytes()
        .to_vec()
    }
}

impl HidResponse for RawKeyEvent {
    const CMD: u8 = cmd::KEY_EVENT;
    const MIN_LEN: usize = KEY_EVENT_LEN;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let data = KeyEventData::read_from_bytes(&payload[..KEY_EVENT_LEN]).map_err(|_| {
            ParseError::TooShort {
                expected: KEY_EVENT_LEN,
                got: payload.len(),
            }
        })?;
        Ok(Self {
            keycode: u16::from_be_bytes(data.keycode),
            col: data.col,
            row: data.row,
            pressed: data.pressed != 0,
            mods: data.mods,
            layer: data.layer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(cmd: u8, payload: &[u8]) -> Response {
        Response {
            cmd,
            call_id: 0,
            payload: payload.to_vec(),
        }
    }

    fn metadata(layers: u8, rows: u8, cols: u8) -> LayerMetadata {
        LayerMetadata {
            number_of_layers: layers,
            matrix_rows: rows,
            matrix_cols: cols,
        }
    }

    #[test]
    fn test_layer_metadata_parse() {
        let mut payload = vec![4, 5, 12];
        payload.resize(26, 0);
        let meta = LayerMetadata::parse(&response(cmd::GET_LAYER_METADATA, &payload)).unwrap();
        assert_eq!(meta, metadata(4, 5, 12));
        assert_eq!(meta.layer_map_len(), 4 * 5 * 12 * 2);
    }

    #[test]
    fn test_response_command_mismatch() {
        let err = LayerMetadata::parse(&response(cmd::GET_LAYERS, &[1, 2, 3])).unwrap_err();
        assert_eq!(
            err,
            ParseError::CommandMismatch {
                expected: cmd::GET_LAYER_METADATA,
                got: cmd::GET_LAYERS
            }
        );
    }

    #[test]
    fn test_layer_metadata_too_short() {
        let err = LayerMetadata::parse(&response(cmd::GET_LAYER_METADATA, &[1, 2])).unwrap_err();
        assert_eq!(err, ParseError::TooShort { expected: 3, got: 2 });
    }

    #[test]
    fn test_layer_metadata_rejects_zero_counts() {
        // truncated [layers, rows] reply, zero padded by reassembly
        let mut payload = vec![1, 1];
        payload.resize(26, 0);
        let err = LayerMetadata::parse(&response(cmd::GET_LAYER_METADATA, &payload)).unwrap_err();
        assert_eq!(
            err,
            ParseError::EmptyDimensions {
                layers: 1,
                rows: 1,
                cols: 0
            }
        );

        let err = LayerMetadata::parse(&response(cmd::GET_LAYER_METADATA, &[0, 5, 12])).unwrap_err();
        assert!(matches!(err, ParseError::EmptyDimensions { layers: 0, .. }));
    }

    #[test]
    fn test_layer_map_single_row() {
        let mut bytes = vec![0x00, 0x04, 0x00, 0x05];
        bytes.resize(26, 0); // report padding
        let map = LayerMap::decode(
            metadata(1, 1, 2),
            &LayerDump { bytes },
            LayerDecodeMode::Strict,
        )
        .unwrap();
        assert_eq!(map.layers, vec![vec![vec![0x0004, 0x0005]]]);
        assert_eq!(map.hex_layers()[0][0], vec!["4".to_string(), "5".to_string()]);
    }

    #[test]
    fn test_layer_map_shape() {
        let meta = metadata(3, 4, 6);
        let bytes: Vec<u8> = (0..meta.cells() as u16).flat_map(|i| i.to_be_bytes()).collect();
        let map = LayerMap::decode(meta, &LayerDump { bytes }, LayerDecodeMode::Strict).unwrap();

        assert_eq!(map.layers.len(), 3);
        for layer in &map.layers {
            assert_eq!(layer.len(), 4);
            for row in layer {
                assert_eq!(row.len(), 6);
            }
        }
        // row-major, layer-major
        assert_eq!(map.keycode(0, 0, 0), Some(0));
        assert_eq!(map.keycode(0, 1, 0), Some(6));
        assert_eq!(map.keycode(1, 0, 0), Some(24));
        assert_eq!(map.keycode(2, 3, 5), Some(71));
        assert_eq!(map.cells().count(), meta.cells());
    }

    #[test]
    fn test_layer_map_big_endian_cells() {
        let map = LayerMap::decode(
            metadata(1, 1, 1),
            &LayerDump {
                bytes: vec![0x40, 0x2C],
            },
            LayerDecodeMode::Strict,
        )
        .unwrap();
        assert_eq!(map.keycode(0, 0, 0), Some(0x402C));
        assert_eq!(map.hex_layers()[0][0][0], "402C");
    }

    #[test]
    fn test_short_layer_map_lenient() {
        // 2 layers of 2x2 declared, only 1.5 layers delivered
        let bytes: Vec<u8> = (1..=6u16).flat_map(|i| i.to_be_bytes()).collect();
        let map = LayerMap::decode(
            metadata(2, 2, 2),
            &LayerDump { bytes },
            LayerDecodeMode::Lenient,
        )
        .unwrap();
        assert_eq!(map.layers.len(), 2);
        assert_eq!(map.layers[0], vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(map.layers[1], vec![vec![5, 6]]);
        assert_eq!(map.keycode(1, 1, 0), None);
    }

    #[test]
    fn test_short_layer_map_strict() {
        let err = LayerMap::decode(
            metadata(2, 2, 2),
            &LayerDump {
                bytes: vec![0; 10],
            },
            LayerDecodeMode::Strict,
        )
        .unwrap_err();
        assert_eq!(err, ParseError::ShortLayerMap { expected: 16, got: 10 });
    }

    #[test]
    fn test_strict_rejects_dump_one_cell_short() {
        // 14 cells need two reports; 13 cells fit in one
        let mut bytes: Vec<u8> = (1..=13u16).flat_map(|i| i.to_be_bytes()).collect();
        bytes.resize(26, 0);
        let err = LayerMap::decode(
            metadata(1, 1, 14),
            &LayerDump { bytes },
            LayerDecodeMode::Strict,
        )
        .unwrap_err();
        assert_eq!(err, ParseError::ShortLayerMap { expected: 28, got: 26 });
    }

    #[test]
    fn test_strict_missing_cell_inside_padding_reads_as_no_key() {
        let mut bytes: Vec<u8> = (1..=11u16).flat_map(|i| i.to_be_bytes()).collect();
        bytes.resize(26, 0);
        let map = LayerMap::decode(
            metadata(1, 1, 12),
            &LayerDump { bytes },
            LayerDecodeMode::Strict,
        )
        .unwrap();
        assert_eq!(map.keycode(0, 0, 10), Some(11));
        assert_eq!(map.keycode(0, 0, 11), Some(0x0000));
    }

    #[test]
    fn test_layer_map_empty_dimensions() {
        let map = LayerMap::decode(
            metadata(2, 0, 4),
            &LayerDump { bytes: Vec::new() },
            LayerDecodeMode::Strict,
        )
        .unwrap();
        assert_eq!(map.layers.len(), 2);
        assert_eq!(map.cells().count(), 0);
    }

    #[test]
    fn test_key_event_parse() {
        let mut payload = vec![0x20, 0x04, 3, 1, 1, 0x02, 2];
        payload.resize(26, 0);
        let event = RawKeyEvent::parse(&response(cmd::KEY_EVENT, &payload)).unwrap();
        assert_eq!(
            event,
            RawKeyEvent {
                keycode: 0x2004,
                col: 3,
                row: 1,
                pressed: true,
                mods: 0x02,
                layer: 2,
            }
        );
        assert_eq!(event.to_payload(), payload[..KEY_EVENT_LEN].to_vec());
    }

    #[test]
    fn test_key_event_release_flag() {
        let event =
            RawKeyEvent::parse(&response(cmd::KEY_EVENT, &[0x00, 0x29, 0, 0, 0, 0, 0])).unwrap();
        assert!(!event.pressed);
        assert_eq!(event.keycode, 0x29);
    }
}
