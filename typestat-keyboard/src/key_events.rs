//! Key event classification
//!
//! Raw press/release notifications become one [`ClassifiedKeyEvent`] per
//! release. Dual-function keys can only be classified once the hold time
//! is known, so nothing is emitted on press for any key class.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{trace, warn};
use typestat_transport::RawKeyEvent;

use crate::keycode::{self, KeyType};

/// Hold duration below which a dual-function key counts as a tap
pub const TAP_TERM: Duration = Duration::from_millis(250);

/// Presses tracked at once; the oldest is forgotten beyond this
pub const MAX_HELD_KEYS: usize = 32;

/// Logical keystroke handed to persistence and accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedKeyEvent {
    /// Resolved base keycode or hold alternate
    pub keycode: u16,
    pub key_type: KeyType,
    pub col: u8,
    pub row: u8,
    pub layer: u8,
    /// HID modifier bitfield
    pub mods: u8,
}

#[derive(Debug, Clone, Copy)]
struct PendingKeyDown {
    keycode: u16,
    mods: u8,
    col: u8,
    row: u8,
    layer: u8,
    since: Instant,
}

/// Per-keyboard press/release tracker
#[derive(Debug, Default)]
pub struct KeyEventStateMachine {
    pending: Vec<PendingKeyDown>,
}

impl KeyEventStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently held
    pub fn held(&self) -> usize {
        self.pending.len()
    }

    /// Forget all held keys (device disconnected)
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Feed one raw event observed at `now`
    pub fn handle(&mut self, event: RawKeyEvent, now: Instant) -> Option<ClassifiedKeyEvent> {
        if event.pressed {
            trace!(keycode = event.keycode, row = event.row, col = event.col, "Key down");
            if let Some(index) = self.position(event.keycode) {
                warn!(
                    "Repeated press of 0x{:04X} at ({}, {}); earlier release was lost",
                    event.keycode, event.row, event.col
                );
                self.pending.remove(index);
            } else if self.pending.len() >= MAX_HELD_KEYS {
                let stale = self.pending.remove(0);
                warn!(
                    "Too many held keys, forgetting press of 0x{:04X}",
                    stale.keycode
                );
            }
            self.pending.push(PendingKeyDown {
                keycode: event.keycode,
                mods: event.mods,
                col: event.col,
                row: event.row,
                layer: event.layer,
                since: now,
            });
            return None;
        }

        let down = match self.position(event.keycode) {
            Some(index) => self.pending.remove(index),
            None => {
                warn!(
                    "Release of 0x{:04X} at ({}, {}) without a matching press",
                    event.keycode, event.row, event.col
                );
                PendingKeyDown {
                    keycode: event.keycode,
                    mods: event.mods,
                    col: event.col,
                    row: event.row,
                    layer: event.layer,
                    since: now,
                }
            }
        };

        Some(classify(&down, now.saturating_duration_since(down.since)))
    }

    fn position(&self, keycode: u16) -> Option<usize> {
        self.pending.iter().position(|p| p.keycode == keycode)
    }
}

fn classify(down: &PendingKeyDown, held: Duration) -> ClassifiedKeyEvent {
    let kc = down.keycode;
    let tap = held < TAP_TERM;
    let plain = |keycode: u16, mods: u8| ClassifiedKeyEvent {
        keycode,
        key_type: KeyType::Plain,
        col: down.col,
        row: down.row,
        layer: down.layer,
        mods,
    };

    if keycode::is_mod_tap(kc) && !keycode::is_layer_tap(kc) && !keycode::is_custom(kc) {
        let modifier = keycode::get_modifier_from_mod_tap(kc);
        if tap {
            let stripped = down.mods & !keycode::modifier_bit(modifier);
            plain(keycode::get_basic(kc), stripped)
        } else {
            ClassifiedKeyEvent {
                keycode: if modifier != 0 { modifier } else { kc },
                key_type: KeyType::ModTap,
                ..plain(kc, down.mods)
            }
        }
    } else if keycode::is_layer_tap(kc) && !keycode::is_custom(kc) {
        if tap {
            plain(keycode::get_basic(kc), down.mods)
        } else {
            let destination = keycode::get_layer_from_layer_tap(kc);
            ClassifiedKeyEvent {
                keycode: keycode::momentary(destination),
                key_type: KeyType::LayerTap,
                layer: destination,
                ..plain(kc, down.mods)
            }
        }
    } else {
        plain(kc, down.mods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycode::{mod5, range, KC_LSFT, KC_RCTL};

    const KC_A: u16 = 0x04;
    const KC_SPC: u16 = 0x2C;
    const MT_LSFT_A: u16 = range::QK_MOD_TAP | ((mod5::SFT as u16) << 8) | KC_A;
    const LT1_SPC: u16 = range::QK_LAYER_TAP | (1 << 8) | KC_SPC;

    fn raw(keycode: u16, pressed: bool, mods: u8, layer: u8) -> RawKeyEvent {
        RawKeyEvent {
            keycode,
            col: 3,
            row: 1,
            pressed,
            mods,
            layer,
        }
    }

    fn tap(sm: &mut KeyEventStateMachine, keycode: u16, held_ms: u64) -> ClassifiedKeyEvent {
        let t0 = Instant::now();
        assert!(sm.handle(raw(keycode, true, 0, 0), t0).is_none());
        sm.handle(raw(keycode, false, 0, 0), t0 + Duration::from_millis(held_ms))
            .unwrap()
    }

    #[test]
    fn test_plain_key_emits_on_release_only() {
        let mut sm = KeyEventStateMachine::new();
        let t0 = Instant::now();
        assert!(sm.handle(raw(KC_A, true, 0x01, 0), t0).is_none());
        assert_eq!(sm.held(), 1);

        let event = sm
            .handle(raw(KC_A, false, 0x01, 0), t0 + Duration::from_millis(80))
            .unwrap();
        assert_eq!(
            event,
            ClassifiedKeyEvent {
                keycode: KC_A,
                key_type: KeyType::Plain,
                col: 3,
                row: 1,
                layer: 0,
                mods: 0x01,
            }
        );
        assert_eq!(sm.held(), 0);
    }

    #[test]
    fn test_mod_tap_tap_term_boundary() {
        let mut sm = KeyEventStateMachine::new();

        let fast = tap(&mut sm, MT_LSFT_A, 249);
        assert_eq!(fast.key_type, KeyType::Plain);
        assert_eq!(fast.keycode, KC_A);

        let slow = tap(&mut sm, MT_LSFT_A, 250);
        assert_eq!(slow.key_type, KeyType::ModTap);
        assert_eq!(slow.keycode, KC_LSFT);
    }

    #[test]
    fn test_mod_tap_strips_own_modifier() {
        let mut sm = KeyEventStateMachine::new();
        let t0 = Instant::now();
        // left shift (0x02) from the mod-tap itself plus right ctrl (0x10)
        sm.handle(raw(MT_LSFT_A, true, 0x12, 0), t0);
        let event = sm
            .handle(raw(MT_LSFT_A, false, 0x12, 0), t0 + Duration::from_millis(100))
            .unwrap();
        assert_eq!(event.mods, 0x10);
    }

    #[test]
    fn test_right_mod_tap_hold() {
        let mut sm = KeyEventStateMachine::new();
        let mt_rctl_a = range::QK_MOD_TAP | (((mod5::RIGHT | mod5::CTL) as u16) << 8) | KC_A;
        let event = tap(&mut sm, mt_rctl_a, 400);
        assert_eq!(event.key_type, KeyType::ModTap);
        assert_eq!(event.keycode, KC_RCTL);
    }

    #[test]
    fn test_layer_tap_tap_uses_press_layer() {
        let mut sm = KeyEventStateMachine::new();
        let t0 = Instant::now();
        sm.handle(raw(LT1_SPC, true, 0, 2), t0);
        let event = sm
            .handle(raw(LT1_SPC, false, 0, 1), t0 + Duration::from_millis(120))
            .unwrap();
        assert_eq!(event.key_type, KeyType::Plain);
        assert_eq!(event.keycode, KC_SPC);
        assert_eq!(event.layer, 2);
    }

    #[test]
    fn test_layer_tap_hold() {
        let mut sm = KeyEventStateMachine::new();
        let event = tap(&mut sm, LT1_SPC, 250);
        assert_eq!(event.key_type, KeyType::LayerTap);
        assert_eq!(event.keycode, keycode::momentary(1));
        assert_eq!(event.layer, 1);
    }

    #[test]
    fn test_custom_keycode_is_plain() {
        let mut sm = KeyEventStateMachine::new();
        let event = tap(&mut sm, range::QK_USER + 1, 900);
        assert_eq!(event.key_type, KeyType::Plain);
        assert_eq!(event.keycode, range::QK_USER + 1);
    }

    #[test]
    fn test_spurious_release_counts_as_tap() {
        let mut sm = KeyEventStateMachine::new();
        let event = sm
            .handle(raw(MT_LSFT_A, false, 0, 0), Instant::now())
            .unwrap();
        assert_eq!(event.key_type, KeyType::Plain);
        assert_eq!(event.keycode, KC_A);
        assert_eq!(sm.held(), 0);
    }

    #[test]
    fn test_overlapping_keys_match_by_keycode() {
        let mut sm = KeyEventStateMachine::new();
        let t0 = Instant::now();
        sm.handle(raw(MT_LSFT_A, true, 0, 0), t0);
        sm.handle(raw(KC_SPC, true, 0x02, 0), t0 + Duration::from_millis(50));

        // space released first, mod-tap still held
        let space = sm
            .handle(raw(KC_SPC, false, 0x02, 0), t0 + Duration::from_millis(100))
            .unwrap();
        assert_eq!(space.keycode, KC_SPC);
        assert_eq!(sm.held(), 1);

        let shift = sm
            .handle(raw(MT_LSFT_A, false, 0, 0), t0 + Duration::from_millis(300))
            .unwrap();
        assert_eq!(shift.key_type, KeyType::ModTap);
    }

    #[test]
    fn test_repeated_press_replaces_held_key() {
        let mut sm = KeyEventStateMachine::new();
        let t0 = Instant::now();
        sm.handle(raw(MT_LSFT_A, true, 0, 0), t0);
        // release lost; the next press starts the hold over
        sm.handle(raw(MT_LSFT_A, true, 0, 0), t0 + Duration::from_millis(500));
        assert_eq!(sm.held(), 1);

        let event = sm
            .handle(raw(MT_LSFT_A, false, 0, 0), t0 + Duration::from_millis(600))
            .unwrap();
        assert_eq!(event.key_type, KeyType::Plain);
        assert_eq!(sm.held(), 0);
    }

    #[test]
    fn test_held_keys_are_bounded() {
        let mut sm = KeyEventStateMachine::new();
        let t0 = Instant::now();
        for keycode in 0..=MAX_HELD_KEYS as u16 {
            sm.handle(raw(KC_A + keycode, true, 0, 0), t0);
        }
        assert_eq!(sm.held(), MAX_HELD_KEYS);
        // the first press was forgotten, so its release is spurious
        assert_eq!(sm.position(KC_A), None);
        assert!(sm.position(KC_A + MAX_HELD_KEYS as u16).is_some());
    }

    #[test]
    fn test_reset_forgets_held_keys() {
        let mut sm = KeyEventStateMachine::new();
        sm.handle(raw(KC_A, true, 0, 0), Instant::now());
        sm.reset();
        assert_eq!(sm.held(), 0);
    }
}
