//! QMK quantum keycode decoding
//!
//! 16-bit keycodes partition into ranges:
//!
//! ```text
//! 0x0000..=0x00FF  basic HID keycode
//! 0x0100..=0x1FFF  basic keycode with modifiers        mod5 << 8 | kc
//! 0x2000..=0x3FFF  mod-tap                    0x2000 | mod5 << 8 | kc
//! 0x4000..=0x4FFF  layer-tap                  0x4000 | layer << 8 | kc
//! 0x5000..=0x51FF  layer-mod                  0x5000 | layer << 5 | mod5
//! 0x5200..=0x52DF  TO / MO / DF / TG / OSL / OSM / TT, 32 codes each
//! 0x7E00..=0x7E3F  keyboard custom
//! 0x7E40..=0x7FFF  user custom
//! ```
//!
//! `mod5` is ctrl 0x01, shift 0x02, alt 0x04, gui 0x08, plus 0x10 for the
//! right-hand variants.

use std::fmt;

use crate::hid_codes;

/// Keycode range boundaries
pub mod range {
    pub const QK_BASIC_MAX: u16 = 0x00FF;
    pub const QK_MODS: u16 = 0x0100;
    pub const QK_MODS_MAX: u16 = 0x1FFF;
    pub const QK_MOD_TAP: u16 = 0x2000;
    pub const QK_MOD_TAP_MAX: u16 = 0x3FFF;
    pub const QK_LAYER_TAP: u16 = 0x4000;
    pub const QK_LAYER_TAP_MAX: u16 = 0x4FFF;
    pub const QK_LAYER_MOD: u16 = 0x5000;
    pub const QK_LAYER_MOD_MAX: u16 = 0x51FF;
    pub const QK_TO: u16 = 0x5200;
    pub const QK_MOMENTARY: u16 = 0x5220;
    pub const QK_DEF_LAYER: u16 = 0x5240;
    pub const QK_TOGGLE_LAYER: u16 = 0x5260;
    pub const QK_ONE_SHOT_LAYER: u16 = 0x5280;
    pub const QK_ONE_SHOT_MOD: u16 = 0x52A0;
    pub const QK_LAYER_TAP_TOGGLE: u16 = 0x52C0;
    pub const QK_LAYER_TAP_TOGGLE_MAX: u16 = 0x52DF;
    pub const QK_KB: u16 = 0x7E00;
    pub const QK_KB_MAX: u16 = 0x7E3F;
    pub const QK_USER: u16 = 0x7E40;
    pub const QK_USER_MAX: u16 = 0x7FFF;
}

/// 5-bit modifier field used by modded, mod-tap and layer-mod keycodes
pub mod mod5 {
    pub const CTL: u8 = 0x01;
    pub const SFT: u8 = 0x02;
    pub const ALT: u8 = 0x04;
    pub const GUI: u8 = 0x08;
    pub const RIGHT: u8 = 0x10;
}

/// Modifier keycodes
pub const KC_LCTL: u16 = 0xE0;
pub const KC_LSFT: u16 = 0xE1;
pub const KC_LALT: u16 = 0xE2;
pub const KC_LGUI: u16 = 0xE3;
pub const KC_RCTL: u16 = 0xE4;
pub const KC_RSFT: u16 = 0xE5;
pub const KC_RALT: u16 = 0xE6;
pub const KC_RGUI: u16 = 0xE7;

/// Semantic class of a keycode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyType {
    Plain,
    ModTap,
    LayerTap,
    LayerMod,
}

impl KeyType {
    pub const ALL: [KeyType; 4] = [Self::Plain, Self::ModTap, Self::LayerTap, Self::LayerMod];

    /// Stable numeric code for storage
    pub fn code(self) -> u8 {
        match self {
            Self::Plain => 0,
            Self::ModTap => 1,
            Self::LayerTap => 2,
            Self::LayerMod => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::ModTap => "mod-tap",
            Self::LayerTap => "layer-tap",
            Self::LayerMod => "layer-mod",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low byte in the modifier keycode block (0xE0..=0xEF)
pub fn is_modifier(base: u16) -> bool {
    (0xE0..=0xEF).contains(&(base & 0xFF))
}

pub fn is_mod_tap(kc: u16) -> bool {
    (range::QK_MOD_TAP..=range::QK_MOD_TAP_MAX).contains(&kc)
}

pub fn is_layer_tap(kc: u16) -> bool {
    (range::QK_LAYER_TAP..=range::QK_LAYER_TAP_MAX).contains(&kc)
}

pub fn is_layer_mod(kc: u16) -> bool {
    (range::QK_LAYER_MOD..=range::QK_LAYER_MOD_MAX).contains(&kc)
}

/// Basic keycode with modifier bits (`LCTL(KC_A)`)
pub fn is_modded(kc: u16) -> bool {
    (range::QK_MODS..=range::QK_MODS_MAX).contains(&kc)
}

/// Keyboard- or user-defined keycode
pub fn is_custom(kc: u16) -> bool {
    (range::QK_KB..=range::QK_USER_MAX).contains(&kc)
}

/// The "as if plain" keycode: the low byte
pub fn get_basic(kc: u16) -> u16 {
    kc & 0x00FF
}

/// `mod5` field of a modded or mod-tap keycode
pub fn get_mod5(kc: u16) -> u8 {
    ((kc >> 8) & 0x1F) as u8
}

/// Modifier keycode for a `mod5` value encoding exactly one modifier.
/// Returns 0 for zero or combined modifiers.
pub fn mod5_to_modifier(mods: u8) -> u16 {
    let offset = match mods & 0x0F {
        mod5::CTL => 0,
        mod5::SFT => 1,
        mod5::ALT => 2,
        mod5::GUI => 3,
        _ => return 0,
    };
    let right = if mods & mod5::RIGHT != 0 { 4 } else { 0 };
    KC_LCTL + offset + right
}

/// The single modifier held by a mod-tap key, or 0 when the encoding
/// combines several
pub fn get_modifier_from_mod_tap(kc: u16) -> u16 {
    mod5_to_modifier(get_mod5(kc))
}

/// Destination layer of a layer-tap keycode
pub fn get_layer_from_layer_tap(kc: u16) -> u8 {
    ((kc >> 8) & 0x0F) as u8
}

/// Destination layer of a layer-mod keycode
pub fn get_layer_from_layer_mod(kc: u16) -> u8 {
    ((kc >> 5) & 0x0F) as u8
}

/// `mod5` field of a layer-mod keycode
pub fn get_mod_from_layer_mod(kc: u16) -> u8 {
    (kc & 0x1F) as u8
}

/// `MO(layer)`
pub fn momentary(layer: u8) -> u16 {
    range::QK_MOMENTARY | (layer as u16 & 0x1F)
}

/// HID modifier bit for a modifier keycode (`KC_LSFT` → 0x02), 0 otherwise
pub fn modifier_bit(modifier: u16) -> u8 {
    if modifier <= KC_RGUI && is_modifier(modifier) {
        1 << (modifier - KC_LCTL)
    } else {
        0
    }
}

/// Expand an 8-bit HID modifier bitfield into keycode-space modifier bits.
///
/// The bitfield moves to the high byte: left-hand modifiers land on the
/// `LCTL(kc)`..`LGUI(kc)` bits and right-hand ones on 0x1000..0x8000, so
/// every combination stays distinguishable when OR-ed with a basic keycode.
pub fn modifier_bitfield_to_masked_modifiers(mods: u8) -> u16 {
    (mods as u16) << 8
}

/// Modifier keycodes held in a mask built by
/// [`modifier_bitfield_to_masked_modifiers`]
pub fn get_modifiers_from_mods_bitfield(mask: u16) -> Vec<u16> {
    (0..8u16)
        .filter(|bit| mask & (0x0100 << bit) != 0)
        .map(|bit| KC_LCTL + bit)
        .collect()
}

/// Modifier keycodes held in an 8-bit HID modifier bitfield
pub fn held_modifiers(mods: u8) -> Vec<u16> {
    (0..8u16)
        .filter(|bit| mods & (1 << bit) != 0)
        .map(|bit| KC_LCTL + bit)
        .collect()
}

/// Classify a keycode; ModTap > LayerTap > LayerMod on conflicts.
///
/// Modded basic keycodes are Plain: their modifiers are part of the chord.
pub fn get_type(kc: u16) -> KeyType {
    if is_mod_tap(kc) {
        KeyType::ModTap
    } else if is_layer_tap(kc) {
        KeyType::LayerTap
    } else if is_layer_mod(kc) {
        KeyType::LayerMod
    } else {
        KeyType::Plain
    }
}

fn basic_label(code: u16) -> String {
    match hid_codes::basic_name(code as u8) {
        Some(name) => name.to_string(),
        None => format!("0x{:02X}", code),
    }
}

fn mod5_label(mods: u8) -> String {
    let side = if mods & mod5::RIGHT != 0 { 'R' } else { 'L' };
    let names: Vec<String> = [
        (mod5::CTL, "Ctl"),
        (mod5::SFT, "Sft"),
        (mod5::ALT, "Alt"),
        (mod5::GUI, "Gui"),
    ]
    .into_iter()
    .filter(|(bit, _)| mods & bit != 0)
    .map(|(_, name)| format!("{side}{name}"))
    .collect();
    names.join("+")
}

/// Human-readable label (`A`, `LCtl+A`, `MT(LSft,A)`, `LT(1,Spc)`, ...)
pub fn keycode_label(kc: u16) -> String {
    use range::*;

    match kc {
        0..=QK_BASIC_MAX => basic_label(kc),
        QK_MODS..=QK_MODS_MAX => {
            format!("{}+{}", mod5_label(get_mod5(kc)), basic_label(get_basic(kc)))
        }
        QK_MOD_TAP..=QK_MOD_TAP_MAX => format!(
            "MT({},{})",
            mod5_label(get_mod5(kc)),
            basic_label(get_basic(kc))
        ),
        QK_LAYER_TAP..=QK_LAYER_TAP_MAX => format!(
            "LT({},{})",
            get_layer_from_layer_tap(kc),
            basic_label(get_basic(kc))
        ),
        QK_LAYER_MOD..=QK_LAYER_MOD_MAX => format!(
            "LM({},{})",
            get_layer_from_layer_mod(kc),
            mod5_label(get_mod_from_layer_mod(kc))
        ),
        QK_TO..=QK_LAYER_TAP_TOGGLE_MAX => {
            let arg = kc & 0x1F;
            let name = match kc & !0x1F {
                QK_TO => "TO",
                QK_MOMENTARY => "MO",
                QK_DEF_LAYER => "DF",
                QK_TOGGLE_LAYER => "TG",
                QK_ONE_SHOT_LAYER => "OSL",
                QK_ONE_SHOT_MOD => return format!("OSM({})", mod5_label(arg as u8)),
                _ => "TT",
            };
            format!("{name}({arg})")
        }
        QK_KB..=QK_KB_MAX => format!("KB({})", kc - QK_KB),
        QK_USER..=QK_USER_MAX => format!("USER({})", kc - QK_USER),
        _ => format!("0x{:04X}", kc),
    }
}
