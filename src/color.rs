use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::board::Player;

/// An sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const LOCAL_NATURAL: Rgb = Rgb(0x00, 0x99, 0xff);
    pub const LOCAL_BLACK: Rgb = Rgb(0x00, 0x66, 0xff);
    pub const GUEST_NATURAL: Rgb = Rgb(0xfc, 0xba, 0x03);
    pub const GUEST_BLACK: Rgb = Rgb(0xba, 0x89, 0x00);

    /// Builds a color from hue in degrees, saturation and value in 0..=1.
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let c = v * s;
        let h_prime = (h.rem_euclid(360.0)) / 60.0;
        let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
        let m = v - c;

        let (r, g, b) = if h_prime < 1.0 {
            (c, x, 0.0)
        } else if h_prime < 2.0 {
            (x, c, 0.0)
        } else if h_prime < 3.0 {
            (0.0, c, x)
        } else if h_prime < 4.0 {
            (0.0, x, c)
        } else if h_prime < 5.0 {
            (x, 0.0, c)
        } else {
            (c, 0.0, x)
        };

        let channel = |f: f32| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb(channel(r), channel(g), channel(b))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid color {0:?}")]
pub struct ParseColorError(pub String);

impl FromStr for Rgb {
    type Err = ParseColorError;

    /// Accepts `#rrggbb` and the short `#rgb` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColorError(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(err)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(err());
        }
        let digit = |i: usize, len: usize| u8::from_str_radix(&hex[i..i + len], 16).map_err(|_| err());
        match hex.len() {
            6 => Ok(Rgb(digit(0, 2)?, digit(2, 2)?, digit(4, 2)?)),
            3 => Ok(Rgb(digit(0, 1)? * 17, digit(1, 1)? * 17, digit(2, 1)? * 17)),
            _ => Err(err()),
        }
    }
}

/// Deterministic 32-bit string hash (`h = c + (h << 5) - h`).
pub fn hash_str(s: &str) -> u32 {
    s.chars().fold(0u32, |hash, c| {
        (c as u32).wrapping_add(hash.wrapping_shl(5)).wrapping_sub(hash)
    })
}

/// The pair of colors a player's notes are drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteColors {
    pub natural: Rgb,
    pub black: Rgb,
}

impl NoteColors {
    pub fn for_player(player: &Player) -> Self {
        match player {
            Player::Local => NoteColors {
                natural: Rgb::LOCAL_NATURAL,
                black: Rgb::LOCAL_BLACK,
            },
            Player::Remote(id) if id.is_empty() => NoteColors {
                natural: Rgb::GUEST_NATURAL,
                black: Rgb::GUEST_BLACK,
            },
            Player::Remote(id) => {
                let hue = (hash_str(id) % 360) as f32;
                NoteColors {
                    natural: Rgb::from_hsv(hue, 0.8, 0.99),
                    black: Rgb::from_hsv(hue, 0.8, 0.73),
                }
            }
        }
    }

    pub fn pick(&self, black_key: bool) -> Rgb {
        if black_key {
            self.black
        } else {
            self.natural
        }
    }
}
