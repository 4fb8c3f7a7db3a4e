//! Per-keyboard daemon session
//!
//! A [`KeyboardSession`] waits for its keyboard, syncs the keymap into the
//! store and then feeds key events through a [`UsageTracker`] until the
//! device goes away, after which it returns to polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use typestat_keyboard::{
    get_type, ClassifiedKeyEvent, Finger, FingerUsage, Hand, HandUsage, KeyEventStateMachine,
    KeyboardError, KeyboardInterface, RawKeyEvent, Streak,
};
use typestat_transport::protocol::timing;
use typestat_transport::{CorrelationManager, DeviceDiscovery};

use crate::config::{FingerMap, KeyboardConfig};
use crate::store::{today, Day, KeymapCell, KeymapKey, StoreHandle, StoreOp};

/// Turns raw key events of one connected keyboard into store writes
pub struct UsageTracker {
    keyboard: Arc<str>,
    finger_map: FingerMap,
    store: StoreHandle,
    state_machine: KeyEventStateMachine,
    hands: HandUsage,
    fingers: FingerUsage,
}

impl UsageTracker {
    pub fn new(keyboard: Arc<str>, finger_map: FingerMap, store: StoreHandle) -> Self {
        Self {
            keyboard,
            finger_map,
            store,
            state_machine: KeyEventStateMachine::new(),
            hands: HandUsage::new(),
            fingers: FingerUsage::new(),
        }
    }

    /// Feed one raw event; returns the classified event if one was emitted
    pub fn handle(&mut self, event: RawKeyEvent, now: Instant) -> Option<ClassifiedKeyEvent> {
        let classified = self.state_machine.handle(event, now)?;
        let day = today();

        self.store.send(StoreOp::Record {
            keyboard: self.keyboard.clone(),
            key: KeymapKey {
                layer: classified.layer,
                row: classified.row,
                col: classified.col,
                keycode: classified.keycode,
            },
            modifiers: classified.mods,
            day,
        });

        match self.finger_map.finger_at(classified.row, classified.col) {
            Some(finger) => {
                if let Some(streak) = self.hands.record(finger.hand(), now) {
                    self.commit_hand(streak, day);
                }
                if let Some(streak) = self.fingers.record(finger) {
                    self.commit_finger(streak, day);
                }
            }
            // no finger_map at all: accounting is off for this keyboard
            None if self.finger_map.is_empty() => {}
            None => warn!(
                keyboard = %self.keyboard,
                "No finger configured for row {} col {}",
                classified.row,
                classified.col
            ),
        }

        Some(classified)
    }

    /// When [`poll_idle`](Self::poll_idle) is due
    pub fn deadline(&self) -> Option<Instant> {
        self.hands.deadline()
    }

    /// Commit the running hand streak if it has been idle long enough
    pub fn poll_idle(&mut self, now: Instant) {
        if let Some(streak) = self.hands.poll_idle(now) {
            self.commit_hand(streak, today());
        }
    }

    /// Drop held keys and running streaks without committing them
    pub fn reset(&mut self) {
        self.state_machine.reset();
        self.hands.reset();
        self.fingers.reset();
    }

    fn commit_hand(&self, streak: Streak<Hand>, day: Day) {
        debug!(keyboard = %self.keyboard, "{} hand streak of {}", streak.bucket, streak.length);
        self.store.send(StoreOp::HandUsage {
            keyboard: self.keyboard.clone(),
            hand: streak.bucket,
            streak: streak.length,
            day,
        });
    }

    fn commit_finger(&self, streak: Streak<Finger>, day: Day) {
        self.store.send(StoreOp::FingerUsage {
            keyboard: self.keyboard.clone(),
            finger: streak.bucket,
            streak: streak.length,
            day,
        });
    }
}

/// Connect-track-reconnect loop for one configured keyboard
pub struct KeyboardSession {
    config: KeyboardConfig,
    keyboard: Arc<str>,
    discovery: Arc<dyn DeviceDiscovery>,
    store: StoreHandle,
    poll_interval: Duration,
    packet_delay: Duration,
}

impl KeyboardSession {
    pub fn new(
        config: KeyboardConfig,
        discovery: Arc<dyn DeviceDiscovery>,
        store: StoreHandle,
        poll_interval: Duration,
    ) -> Self {
        Self {
            keyboard: Arc::from(config.name.as_str()),
            config,
            discovery,
            store,
            poll_interval,
            packet_delay: Duration::from_millis(timing::PACKET_DELAY_MS),
        }
    }

    /// Override the inter-packet write delay
    pub fn with_packet_delay(mut self, delay: Duration) -> Self {
        self.packet_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.keyboard
    }

    /// Track the keyboard forever, reconnecting after every disconnect or
    /// setup failure
    pub async fn run(&self) {
        loop {
            match self.run_once().await {
                Ok(()) => info!(keyboard = %self.keyboard, "Keyboard disconnected"),
                Err(e) => warn!(keyboard = %self.keyboard, "Session ended: {}", e),
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One connection: wait, open, sync keymap, track until disconnect
    pub async fn run_once(&self) -> Result<(), KeyboardError> {
        let selector = self.config.selector();
        let found = self.discovery.wait_for(&selector, self.poll_interval).await;
        let opened = self.discovery.open_device(&found).await?;
        info!(
            keyboard = %self.keyboard,
            "Connected to {}",
            found.info.product_name.as_deref().unwrap_or(&found.info.device_path)
        );

        let manager =
            CorrelationManager::start_with_delay(opened.transport, opened.reports, self.packet_delay);
        let kb = KeyboardInterface::new(manager.clone());
        let result = self.track(&kb).await;

        if let Err(e) = manager.close().await {
            debug!(keyboard = %self.keyboard, "Close failed: {}", e);
        }
        result
    }

    async fn track(&self, kb: &KeyboardInterface) -> Result<(), KeyboardError> {
        // subscribe first so presses during the keymap sync are not lost
        let mut events = kb.subscribe_key_events();

        kb.get_layer_metadata().await?;
        let layers = kb.get_layers().await?;
        for (layer, row, col, keycode) in layers.cells() {
            self.store.send(StoreOp::KeymapCell {
                keyboard: self.keyboard.clone(),
                cell: KeymapCell {
                    layer,
                    row,
                    col,
                    keycode,
                    key_type: get_type(keycode),
                },
            });
        }
        info!(
            keyboard = %self.keyboard,
            "Synced keymap: {} layers, {}x{}",
            layers.metadata.number_of_layers,
            layers.metadata.matrix_rows,
            layers.metadata.matrix_cols
        );

        let mut tracker = UsageTracker::new(
            self.keyboard.clone(),
            self.config.finger_map.clone(),
            self.store.clone(),
        );
        loop {
            let deadline = tracker.deadline();
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => {
                        if let Some(classified) = tracker.handle(event, Instant::now()) {
                            debug!(keyboard = %self.keyboard, "{:?}", classified);
                        }
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracker.poll_idle(Instant::now());
                }
            }
        }

        tracker.reset();
        Ok(())
    }
}
