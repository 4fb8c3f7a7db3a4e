//! Keyboard semantics for the typestat raw-HID protocol
//!
//! This crate sits on top of `typestat-transport`: typed layer queries,
//! QMK keycode decoding, key event classification and streak accounting.

pub mod error;
pub mod hid_codes;
pub mod key_events;
pub mod keycode;
pub mod usage;

pub use error::KeyboardError;
pub use key_events::{ClassifiedKeyEvent, KeyEventStateMachine, MAX_HELD_KEYS, TAP_TERM};
pub use keycode::{get_type, keycode_label, KeyType};
pub use usage::{Finger, FingerUsage, Hand, HandUsage, Streak, StreakCounter, HAND_IDLE_FLUSH};

// Re-export protocol types consumers need alongside the interface
pub use typestat_transport::{LayerDecodeMode, LayerMap, LayerMetadata, RawKeyEvent};

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use typestat_transport::{
    CorrelationManager, GetLayerMetadata, GetLayers, HidResponse, LayerDump, Response,
    TransportDeviceInfo,
};

/// High-level keyboard interface over a correlation manager
///
/// Remembers the last layer metadata so the layer dump can be decoded.
pub struct KeyboardInterface {
    manager: Arc<CorrelationManager>,
    metadata: RwLock<Option<LayerMetadata>>,
    decode_mode: LayerDecodeMode,
}

impl KeyboardInterface {
    /// Create a new keyboard interface (lenient layer decoding)
    pub fn new(manager: Arc<CorrelationManager>) -> Self {
        Self {
            manager,
            metadata: RwLock::new(None),
            decode_mode: LayerDecodeMode::Lenient,
        }
    }

    /// Choose how short layer dumps are handled
    pub fn with_decode_mode(mut self, mode: LayerDecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    /// Get the underlying correlation manager
    pub fn manager(&self) -> &Arc<CorrelationManager> {
        &self.manager
    }

    pub fn device_info(&self) -> &TransportDeviceInfo {
        self.manager.transport().device_info()
    }

    // === Layers ===

    /// Query number of layers and matrix dimensions
    pub async fn get_layer_metadata(&self) -> Result<LayerMetadata, KeyboardError> {
        let metadata: LayerMetadata = self.manager.query(&GetLayerMetadata).await?;
        debug!(
            "Layer metadata: {} layers, {}x{} matrix",
            metadata.number_of_layers, metadata.matrix_rows, metadata.matrix_cols
        );
        *self.metadata.write().await = Some(metadata);
        Ok(metadata)
    }

    /// Metadata from the last successful [`get_layer_metadata`](Self::get_layer_metadata)
    pub async fn layer_metadata(&self) -> Option<LayerMetadata> {
        *self.metadata.read().await
    }

    /// Dump every keycode of every layer
    ///
    /// Requires a prior [`get_layer_metadata`](Self::get_layer_metadata).
    pub async fn get_layers(&self) -> Result<LayerMap, KeyboardError> {
        let metadata = self
            .layer_metadata()
            .await
            .ok_or(KeyboardError::MissingLayerMetadata)?;
        let dump: LayerDump = self.manager.query(&GetLayers).await?;
        Ok(LayerMap::decode(metadata, &dump, self.decode_mode)?)
    }

    // === Key events ===

    /// Subscribe to key event notifications
    pub fn subscribe_key_events(&self) -> KeyEventStream {
        KeyEventStream {
            rx: self.manager.subscribe(),
        }
    }
}

/// Decoded key event notifications
pub struct KeyEventStream {
    rx: mpsc::UnboundedReceiver<Response>,
}

impl KeyEventStream {
    /// Next key event; `None` once the device disconnected.
    ///
    /// Malformed notifications are logged and skipped.
    pub async fn next(&mut self) -> Option<RawKeyEvent> {
        loop {
            let response = self.rx.recv().await?;
            match RawKeyEvent::parse(&response) {
                Ok(event) => return Some(event),
                Err(e) => warn!("Dropping malformed key event: {}", e),
            }
        }
    }
}
