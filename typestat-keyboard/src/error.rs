//! Keyboard interface error types

use thiserror::Error;
use typestat_transport::{ParseError, TransportError};

/// Errors from keyboard operations
#[derive(Error, Debug)]
pub enum KeyboardError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Layer dump requested before the matrix dimensions are known
    #[error("Layer metadata missing: query GET_LAYER_METADATA before GET_LAYERS")]
    MissingLayerMetadata,
}

impl From<ParseError> for KeyboardError {
    fn from(e: ParseError) -> Self {
        KeyboardError::Transport(e.into())
    }
}
