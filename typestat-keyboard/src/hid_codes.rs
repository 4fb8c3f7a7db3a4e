//! HID keycode names (US layout)

/// Short display name for a basic HID keycode
/// Returns None for codes without a name
pub fn basic_name(code: u8) -> Option<&'static str> {
    const LETTERS: [&str; 26] = [
        "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
        "S", "T", "U", "V", "W", "X", "Y", "Z",
    ];
    const DIGITS: [&str; 10] = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "0"];
    const F1_F12: [&str; 12] = [
        "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12",
    ];
    const F13_F24: [&str; 12] = [
        "F13", "F14", "F15", "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24",
    ];
    const KEYPAD_DIGITS: [&str; 10] = ["P1", "P2", "P3", "P4", "P5", "P6", "P7", "P8", "P9", "P0"];
    const MODIFIERS: [&str; 8] = ["LCtl", "LSft", "LAlt", "LGui", "RCtl", "RSft", "RAlt", "RGui"];

    let name = match code {
        0x00 => "No",
        0x01 => "Trns",
        // Letters
        0x04..=0x1D => LETTERS[(code - 0x04) as usize],
        // Number row
        0x1E..=0x27 => DIGITS[(code - 0x1E) as usize],
        0x28 => "Ent",
        0x29 => "Esc",
        0x2A => "Bspc",
        0x2B => "Tab",
        0x2C => "Spc",
        0x2D => "-",
        0x2E => "=",
        0x2F => "[",
        0x30 => "]",
        0x31 => "\\",
        0x32 => "NUHS",
        0x33 => ";",
        0x34 => "'",
        0x35 => "`",
        0x36 => ",",
        0x37 => ".",
        0x38 => "/",
        0x39 => "Caps",
        0x3A..=0x45 => F1_F12[(code - 0x3A) as usize],
        0x46 => "PScr",
        0x47 => "ScrL",
        0x48 => "Paus",
        0x49 => "Ins",
        0x4A => "Home",
        0x4B => "PgUp",
        0x4C => "Del",
        0x4D => "End",
        0x4E => "PgDn",
        0x4F => "Rght",
        0x50 => "Left",
        0x51 => "Down",
        0x52 => "Up",
        // Keypad
        0x53 => "Num",
        0x54 => "P/",
        0x55 => "P*",
        0x56 => "P-",
        0x57 => "P+",
        0x58 => "PEnt",
        0x59..=0x62 => KEYPAD_DIGITS[(code - 0x59) as usize],
        0x63 => "P.",
        0x64 => "NUBS",
        0x65 => "App",
        0x67 => "P=",
        0x68..=0x73 => F13_F24[(code - 0x68) as usize],
        // Modifiers
        0xE0..=0xE7 => MODIFIERS[(code - 0xE0) as usize],
        _ => return None,
    };
    Some(name)
}
