//! Computer keyboard note entry.
//!
//! The home row plays one octave, `a` being C and `k` the C above it, with
//! the sharps on the row above. `z` and `x` move the octave down and up.

use std::collections::HashMap;

/// Pitch of `a` at the default octave (C4).
pub const DEFAULT_BASE: u8 = 60;
const LOWEST_BASE: u8 = 12;
const HIGHEST_BASE: u8 = 108;

/// Semitones above the base C for a key name.
pub fn key_offset(name: &str) -> Option<u8> {
    let offset = match name.to_ascii_lowercase().as_str() {
        "a" => 0,
        "w" => 1,
        "s" => 2,
        "e" => 3,
        "d" => 4,
        "f" => 5,
        "t" => 6,
        "g" => 7,
        "y" => 8,
        "h" => 9,
        "u" => 10,
        "j" => 11,
        "k" => 12,
        _ => return None,
    };
    Some(offset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press(u8),
    Release(u8),
    Octave(u8),
    None,
}

/// Tracks which pitch each held key started, so moving the octave while a
/// key is down still releases the right note.
#[derive(Debug, Clone)]
pub struct ComputerKeys {
    base: u8,
    held: HashMap<String, u8>,
}

impl Default for ComputerKeys {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            held: HashMap::new(),
        }
    }
}

impl ComputerKeys {
    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn key_down(&mut self, name: &str) -> KeyAction {
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            "z" if self.base > LOWEST_BASE => {
                self.base -= 12;
                return KeyAction::Octave(self.base);
            }
            "x" if self.base < HIGHEST_BASE => {
                self.base += 12;
                return KeyAction::Octave(self.base);
            }
            _ => {}
        }
        let Some(offset) = key_offset(&name) else {
            return KeyAction::None;
        };
        // Key repeat
        if self.held.contains_key(&name) {
            return KeyAction::None;
        }
        let pitch = self.base + offset;
        if pitch > 127 {
            return KeyAction::None;
        }
        self.held.insert(name, pitch);
        KeyAction::Press(pitch)
    }

    pub fn key_up(&mut self, name: &str) -> KeyAction {
        match self.held.remove(&name.to_ascii_lowercase()) {
            Some(pitch) => KeyAction::Release(pitch),
            None => KeyAction::None,
        }
    }

    /// Releases every held key, e.g. when the window loses focus.
    pub fn release_all(&mut self) -> Vec<u8> {
        let mut pitches: Vec<u8> = self.held.drain().map(|(_, pitch)| pitch).collect();
        pitches.sort_unstable();
        pitches
    }
}
