//! Key combination and modifier key model
//!
//! Value types shared by the interceptor and the hotkey registrar.
//! Modifier state is decoded from raw CGEventFlags bits so this module
//! stays platform-neutral and unit-testable off macOS.

use serde::{Deserialize, Serialize};

/// CGEventFlags modifier masks (CoreGraphics constants)
mod flags {
    pub const SHIFT: u64 = 0x0002_0000;
    pub const CONTROL: u64 = 0x0004_0000;
    pub const OPTION: u64 = 0x0008_0000;
    pub const COMMAND: u64 = 0x0010_0000;
}

/// Escape key code on macOS
pub const ESCAPE_KEY_CODE: u32 = 53;

/// The "L" key, default toggle key of the original app
pub const KEY_CODE_L: u32 = 37;

/// Which modifier keys are held for an event or required by a combination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    /// Command (⌘) is held
    #[serde(default)]
    pub command: bool,
    /// Option/Alt (⌥) is held
    #[serde(default)]
    pub option: bool,
    /// Shift (⇧) is held
    #[serde(default)]
    pub shift: bool,
    /// Control (⌃) is held
    #[serde(default)]
    pub control: bool,
}

impl Modifiers {
    /// Decode modifier state from raw CGEventFlags bits
    pub fn from_event_flags(raw: u64) -> Self {
        Self {
            command: raw & flags::COMMAND != 0,
            option: raw & flags::OPTION != 0,
            shift: raw & flags::SHIFT != 0,
            control: raw & flags::CONTROL != 0,
        }
    }

    /// Check if no modifier is held
    pub fn is_empty(&self) -> bool {
        !self.command && !self.option && !self.shift && !self.control
    }

    /// Command + Shift, the default chord of the original app
    pub fn command_shift() -> Self {
        Self {
            command: true,
            shift: true,
            ..Self::default()
        }
    }
}

impl std::fmt::Display for Modifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.control {
            write!(f, "⌃")?;
        }
        if self.option {
            write!(f, "⌥")?;
        }
        if self.shift {
            write!(f, "⇧")?;
        }
        if self.command {
            write!(f, "⌘")?;
        }
        Ok(())
    }
}

/// A key plus the exact set of modifiers that must be held with it
///
/// Immutable value used both for the configured exit combination and for
/// observed events. Matching is exact: an event holding a superset of the
/// configured modifiers does NOT match, so chords that merely contain the
/// target do not trigger it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCombination {
    /// The key code (CGKeyCode)
    pub key_code: u32,
    /// The exact modifier set
    pub modifiers: Modifiers,
}

impl KeyCombination {
    pub fn new(key_code: u32, modifiers: Modifiers) -> Self {
        Self {
            key_code,
            modifiers,
        }
    }

    /// Check whether an observed (code, modifiers) pair is this combination
    pub fn matches_event(&self, key_code: u32, modifiers: Modifiers) -> bool {
        self.key_code == key_code && self.modifiers == modifiers
    }
}

impl std::fmt::Display for KeyCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.modifiers, key_code_name(self.key_code))
    }
}

/// Human-readable name for a key code, for log lines and status output
pub fn key_code_name(key_code: u32) -> String {
    let name = match key_code {
        0 => "A",
        11 => "B",
        8 => "C",
        2 => "D",
        14 => "E",
        3 => "F",
        5 => "G",
        4 => "H",
        34 => "I",
        38 => "J",
        40 => "K",
        37 => "L",
        46 => "M",
        45 => "N",
        31 => "O",
        35 => "P",
        12 => "Q",
        15 => "R",
        1 => "S",
        17 => "T",
        32 => "U",
        9 => "V",
        13 => "W",
        7 => "X",
        16 => "Y",
        6 => "Z",
        53 => "Esc",
        36 => "Return",
        48 => "Tab",
        49 => "Space",
        51 => "Delete",
        _ => return format!("Key{}", key_code),
    };
    name.to_string()
}
