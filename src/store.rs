//! Usage persistence
//!
//! [`UsageStore`] is the synchronous storage boundary; [`SledStore`] keeps
//! counters on disk and [`MemoryStore`] in memory. The daemon never calls a
//! store from the report path: it enqueues [`StoreOp`]s on a [`StoreHandle`]
//! and a single writer task applies them, logging failures.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Datelike;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use typestat_keyboard::{Finger, Hand, KeyType};

/// Calendar day as days since the Common Era (local time)
pub type Day = i32;

/// Today in local time
pub fn today() -> Day {
    chrono::Local::now().date_naive().num_days_from_ce()
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Corrupt entry in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

/// One keymap position and what is assigned to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeymapCell {
    pub layer: u8,
    pub row: u8,
    pub col: u8,
    pub keycode: u16,
    pub key_type: KeyType,
}

/// A logical key: the classified keycode at a matrix position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeymapKey {
    pub layer: u8,
    pub row: u8,
    pub col: u8,
    pub keycode: u16,
}

/// Keystroke count for one key/modifier combination on one day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCount {
    pub key: KeymapKey,
    pub modifiers: u8,
    pub count: u32,
}

/// How many times a streak of `streak` keystrokes on `bucket` occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakCount<B> {
    pub bucket: B,
    pub streak: u32,
    pub count: u32,
}

/// Storage boundary for keymaps and usage counters.
///
/// Increments are upserts: a missing counter starts at zero. They return
/// the new count.
pub trait UsageStore: Send + Sync {
    fn upsert_keymap_cell(&self, keyboard: &str, cell: KeymapCell) -> Result<(), StoreError>;

    fn increment_record(
        &self,
        keyboard: &str,
        key: KeymapKey,
        modifiers: u8,
        day: Day,
    ) -> Result<u32, StoreError>;

    fn increment_hand_usage(
        &self,
        keyboard: &str,
        hand: Hand,
        streak: u32,
        day: Day,
    ) -> Result<u32, StoreError>;

    fn increment_finger_usage(
        &self,
        keyboard: &str,
        finger: Finger,
        streak: u32,
        day: Day,
    ) -> Result<u32, StoreError>;

    fn keymap(&self, keyboard: &str) -> Result<Vec<KeymapCell>, StoreError>;

    fn records(&self, keyboard: &str, day: Day) -> Result<Vec<RecordCount>, StoreError>;

    fn hand_usage(&self, keyboard: &str, day: Day) -> Result<Vec<StreakCount<Hand>>, StoreError>;

    fn finger_usage(
        &self,
        keyboard: &str,
        day: Day,
    ) -> Result<Vec<StreakCount<Finger>>, StoreError>;

    /// Make pending writes durable
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// sled
// ============================================================================

mod table {
    pub const KEYMAP: &str = "keymap";
    pub const RECORDS: &str = "records";
    pub const HAND_USAGE: &str = "hand_usage";
    pub const FINGER_USAGE: &str = "finger_usage";
}

/// Counters in an embedded sled database, one tree per table.
///
/// Keys are `keyboard \0 fields...` with big-endian fixed-width fields, so
/// a prefix scan over `keyboard \0 day` yields one day's rows in order.
pub struct SledStore {
    db: sled::Db,
    keymap: sled::Tree,
    records: sled::Tree,
    hand_usage: sled::Tree,
    finger_usage: sled::Tree,
}

impl SledStore {
    /// Open (or create) a database directory
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            keymap: db.open_tree(table::KEYMAP)?,
            records: db.open_tree(table::RECORDS)?,
            hand_usage: db.open_tree(table::HAND_USAGE)?,
            finger_usage: db.open_tree(table::FINGER_USAGE)?,
            db,
        })
    }

    fn keyboard_prefix(keyboard: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(keyboard.len() + 16);
        key.extend_from_slice(keyboard.as_bytes());
        key.push(0);
        key
    }

    fn day_prefix(keyboard: &str, day: Day) -> Vec<u8> {
        let mut key = Self::keyboard_prefix(keyboard);
        key.extend_from_slice(&day.to_be_bytes());
        key
    }

    fn increment(tree: &sled::Tree, table: &'static str, key: &[u8]) -> Result<u32, StoreError> {
        let updated = tree.update_and_fetch(key, |old| {
            let count = old.and_then(decode_u32).unwrap_or(0).saturating_add(1);
            Some(count.to_be_bytes().to_vec())
        })?;
        updated
            .as_deref()
            .and_then(decode_u32)
            .ok_or_else(|| StoreError::Corrupt {
                table,
                detail: "counter missing after increment".into(),
            })
    }

    /// Rows under `prefix` as (key suffix, value)
    fn scan(
        tree: &sled::Tree,
        prefix: &[u8],
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>> {
        let skip = prefix.len();
        tree.scan_prefix(prefix).map(move |entry| {
            let (key, value) = entry?;
            Ok((key[skip..].to_vec(), value.to_vec()))
        })
    }

    fn scan_streaks<B>(
        tree: &sled::Tree,
        table: &'static str,
        prefix: &[u8],
        bucket: impl Fn(u8) -> Option<B>,
    ) -> Result<Vec<StreakCount<B>>, StoreError> {
        Self::scan(tree, prefix)
            .map(|entry| {
                let (suffix, value) = entry?;
                let parsed = match (suffix.as_slice(), decode_u32(&value)) {
                    ([b, s0, s1, s2, s3], Some(count)) => bucket(*b).map(|bucket| StreakCount {
                        bucket,
                        streak: u32::from_be_bytes([*s0, *s1, *s2, *s3]),
                        count,
                    }),
                    _ => None,
                };
                parsed.ok_or_else(|| StoreError::Corrupt {
                    table,
                    detail: format!("bad row {:02X?}", suffix),
                })
            })
            .collect()
    }

    fn increment_streak(
        &self,
        tree: &sled::Tree,
        table: &'static str,
        keyboard: &str,
        bucket: u8,
        streak: u32,
        day: Day,
    ) -> Result<u32, StoreError> {
        let mut key = Self::day_prefix(keyboard, day);
        key.push(bucket);
        key.extend_from_slice(&streak.to_be_bytes());
        Self::increment(tree, table, &key)
    }
}

fn decode_u32(bytes: &[u8]) -> Option<u32> {
    bytes.try_into().ok().map(u32::from_be_bytes)
}

impl UsageStore for SledStore {
    fn upsert_keymap_cell(&self, keyboard: &str, cell: KeymapCell) -> Result<(), StoreError> {
        let mut key = Self::keyboard_prefix(keyboard);
        key.extend_from_slice(&[cell.layer, cell.row, cell.col]);
        let [hi, lo] = cell.keycode.to_be_bytes();
        self.keymap.insert(key, vec![hi, lo, cell.key_type.code()])?;
        Ok(())
    }

    fn increment_record(
        &self,
        keyboard: &str,
        key: KeymapKey,
        modifiers: u8,
        day: Day,
    ) -> Result<u32, StoreError> {
        let mut row = Self::day_prefix(keyboard, day);
        row.extend_from_slice(&[key.layer, key.row, key.col]);
        row.extend_from_slice(&key.keycode.to_be_bytes());
        row.push(modifiers);
        Self::increment(&self.records, table::RECORDS, &row)
    }

    fn increment_hand_usage(
        &self,
        keyboard: &str,
        hand: Hand,
        streak: u32,
        day: Day,
    ) -> Result<u32, StoreError> {
        self.increment_streak(
            &self.hand_usage,
            table::HAND_USAGE,
            keyboard,
            hand.code(),
            streak,
            day,
        )
    }

    fn increment_finger_usage(
        &self,
        keyboard: &str,
        finger: Finger,
        streak: u32,
        day: Day,
    ) -> Result<u32, StoreError> {
        self.increment_streak(
            &self.finger_usage,
            table::FINGER_USAGE,
            keyboard,
            finger.id(),
            streak,
            day,
        )
    }

    fn keymap(&self, keyboard: &str) -> Result<Vec<KeymapCell>, StoreError> {
        Self::scan(&self.keymap, &Self::keyboard_prefix(keyboard))
            .map(|entry| {
                let (suffix, value) = entry?;
                let cell = match (suffix.as_slice(), value.as_slice()) {
                    (&[layer, row, col], &[hi, lo, kind]) => KeyType::from_code(kind)
                        .map(|key_type| KeymapCell {
                            layer,
                            row,
                            col,
                            keycode: u16::from_be_bytes([hi, lo]),
                            key_type,
                        }),
                    _ => None,
                };
                cell.ok_or_else(|| StoreError::Corrupt {
                    table: table::KEYMAP,
                    detail: format!("bad row {:02X?}", suffix),
                })
            })
            .collect()
    }

    fn records(&self, keyboard: &str, day: Day) -> Result<Vec<RecordCount>, StoreError> {
        Self::scan(&self.records, &Self::day_prefix(keyboard, day))
            .map(|entry| {
                let (suffix, value) = entry?;
                let record = match (suffix.as_slice(), decode_u32(&value)) {
                    (&[layer, row, col, hi, lo, modifiers], Some(count)) => Some(RecordCount {
                        key: KeymapKey {
                            layer,
                            row,
                            col,
                            keycode: u16::from_be_bytes([hi, lo]),
                        },
                        modifiers,
                        count,
                    }),
                    _ => None,
                };
                record.ok_or_else(|| StoreError::Corrupt {
                    table: table::RECORDS,
                    detail: format!("bad row {:02X?}", suffix),
                })
            })
            .collect()
    }

    fn hand_usage(&self, keyboard: &str, day: Day) -> Result<Vec<StreakCount<Hand>>, StoreError> {
        Self::scan_streaks(
            &self.hand_usage,
            table::HAND_USAGE,
            &Self::day_prefix(keyboard, day),
            Hand::from_code,
        )
    }

    fn finger_usage(
        &self,
        keyboard: &str,
        day: Day,
    ) -> Result<Vec<StreakCount<Finger>>, StoreError> {
        Self::scan_streaks(
            &self.finger_usage,
            table::FINGER_USAGE,
            &Self::day_prefix(keyboard, day),
            Finger::new,
        )
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct MemoryTables {
    keymap: BTreeMap<(String, u8, u8, u8), (u16, KeyType)>,
    records: BTreeMap<(String, Day, KeymapKey, u8), u32>,
    hand_usage: BTreeMap<(String, Day, Hand, u32), u32>,
    finger_usage: BTreeMap<(String, Day, Finger, u32), u32>,
}

/// Counters kept in memory; nothing survives the process
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump<K: Ord>(map: &mut BTreeMap<K, u32>, key: K) -> u32 {
    let count = map.entry(key).or_insert(0);
    *count = count.saturating_add(1);
    *count
}

impl UsageStore for MemoryStore {
    fn upsert_keymap_cell(&self, keyboard: &str, cell: KeymapCell) -> Result<(), StoreError> {
        self.tables.lock().keymap.insert(
            (keyboard.to_string(), cell.layer, cell.row, cell.col),
            (cell.keycode, cell.key_type),
        );
        Ok(())
    }

    fn increment_record(
        &self,
        keyboard: &str,
        key: KeymapKey,
        modifiers: u8,
        day: Day,
    ) -> Result<u32, StoreError> {
        Ok(bump(
            &mut self.tables.lock().records,
            (keyboard.to_string(), day, key, modifiers),
        ))
    }

    fn increment_hand_usage(
        &self,
        keyboard: &str,
        hand: Hand,
        streak: u32,
        day: Day,
    ) -> Result<u32, StoreError> {
        Ok(bump(
            &mut self.tables.lock().hand_usage,
            (keyboard.to_string(), day, hand, streak),
        ))
    }

    fn increment_finger_usage(
        &self,
        keyboard: &str,
        finger: Finger,
        streak: u32,
        day: Day,
    ) -> Result<u32, StoreError> {
        Ok(bump(
            &mut self.tables.lock().finger_usage,
            (keyboard.to_string(), day, finger, streak),
        ))
    }

    fn keymap(&self, keyboard: &str) -> Result<Vec<KeymapCell>, StoreError> {
        Ok(self
            .tables
            .lock()
            .keymap
            .iter()
            .filter(|((kb, ..), _)| kb == keyboard)
            .map(|(&(_, layer, row, col), &(keycode, key_type))| KeymapCell {
                layer,
                row,
                col,
                keycode,
                key_type,
            })
            .collect())
    }

    fn records(&self, keyboard: &str, day: Day) -> Result<Vec<RecordCount>, StoreError> {
        Ok(self
            .tables
            .lock()
            .records
            .iter()
            .filter(|((kb, d, ..), _)| kb == keyboard && *d == day)
            .map(|(&(_, _, key, modifiers), &count)| RecordCount {
                key,
                modifiers,
                count,
            })
            .collect())
    }

    fn hand_usage(&self, keyboard: &str, day: Day) -> Result<Vec<StreakCount<Hand>>, StoreError> {
        Ok(self
            .tables
            .lock()
            .hand_usage
            .iter()
            .filter(|((kb, d, ..), _)| kb == keyboard && *d == day)
            .map(|(&(_, _, bucket, streak), &count)| StreakCount {
                bucket,
                streak,
                count,
            })
            .collect())
    }

    fn finger_usage(
        &self,
        keyboard: &str,
        day: Day,
    ) -> Result<Vec<StreakCount<Finger>>, StoreError> {
        Ok(self
            .tables
            .lock()
            .finger_usage
            .iter()
            .filter(|((kb, d, ..), _)| kb == keyboard && *d == day)
            .map(|(&(_, _, bucket, streak), &count)| StreakCount {
                bucket,
                streak,
                count,
            })
            .collect())
    }
}

// ============================================================================
// Writer task
// ============================================================================

/// A queued store write
#[derive(Debug, Clone)]
pub enum StoreOp {
    KeymapCell {
        keyboard: Arc<str>,
        cell: KeymapCell,
    },
    Record {
        keyboard: Arc<str>,
        key: KeymapKey,
        modifiers: u8,
        day: Day,
    },
    HandUsage {
        keyboard: Arc<str>,
        hand: Hand,
        streak: u32,
        day: Day,
    },
    FingerUsage {
        keyboard: Arc<str>,
        finger: Finger,
        streak: u32,
        day: Day,
    },
}

impl StoreOp {
    fn apply(&self, store: &dyn UsageStore) -> Result<(), StoreError> {
        match self {
            StoreOp::KeymapCell { keyboard, cell } => store.upsert_keymap_cell(keyboard, *cell),
            StoreOp::Record {
                keyboard,
                key,
                modifiers,
                day,
            } => store
                .increment_record(keyboard, *key, *modifiers, *day)
                .map(drop),
            StoreOp::HandUsage {
                keyboard,
                hand,
                streak,
                day,
            } => store
                .increment_hand_usage(keyboard, *hand, *streak, *day)
                .map(drop),
            StoreOp::FingerUsage {
                keyboard,
                finger,
                streak,
                day,
            } => store
                .increment_finger_usage(keyboard, *finger, *streak, *day)
                .map(drop),
        }
    }
}

/// Fire-and-forget sender of store writes
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl StoreHandle {
    /// Queue a write; never blocks and never fails the caller
    pub fn send(&self, op: StoreOp) {
        if let Err(e) = self.tx.send(op) {
            warn!("Store writer gone, dropping {:?}", e.0);
        }
    }
}

/// Spawn the writer task.
///
/// The task ends, after flushing, once every [`StoreHandle`] is dropped.
pub fn spawn_writer(store: Arc<dyn UsageStore>) -> (StoreHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StoreOp>();
    let writer = tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            if let Err(e) = op.apply(store.as_ref()) {
                warn!("Store write failed ({:?}): {}", op, e);
            }
        }
        if let Err(e) = store.flush() {
            warn!("Store flush failed: {}", e);
        }
        debug!("Store writer stopped");
    });
    (StoreHandle { tx }, writer)
}
