use std::time::{Duration, Instant};

use crate::board::DrawnNote;
use crate::note::{self, PIANO_HIGH, PIANO_LOW};

pub const NOTE_WIDTH: f32 = 30.0;
pub const BLACK_NOTE_WIDTH: f32 = 20.0;
pub const NOTE_ROUNDNESS: f32 = 10.0;
pub const NOTE_MIN_HEIGHT: f32 = 10.0;
/// Pixels per second
pub const NOTE_SPEED: f32 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Maps drawn notes onto a falling-note canvas. Notes appear at the bottom
/// edge and rise; `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterfallLayout {
    pub low: u8,
    pub high: u8,
    pub height: f32,
    pub speed: f32,
}

impl Default for WaterfallLayout {
    fn default() -> Self {
        Self {
            low: PIANO_LOW,
            high: PIANO_HIGH,
            height: 400.0,
            speed: NOTE_SPEED,
        }
    }
}

impl WaterfallLayout {
    /// Canvas width needed for the visible white keys.
    pub fn width(&self) -> f32 {
        let mut whites = note::white_keys_before(self.high).saturating_sub(self.first_white());
        if !note::is_black(self.high) {
            whites += 1;
        }
        whites as f32 * NOTE_WIDTH
    }

    /// Horizontal extent of a key lane, black keys straddling two white lanes.
    pub fn lane(&self, pitch: u8) -> (f32, f32) {
        let whites = note::white_keys_before(pitch) as f32 - self.first_white() as f32;
        let mut x = whites * NOTE_WIDTH;
        if note::is_black(pitch) {
            x -= NOTE_WIDTH / 2.0;
            (x + (NOTE_WIDTH - BLACK_NOTE_WIDTH) / 2.0, BLACK_NOTE_WIDTH)
        } else {
            (x, NOTE_WIDTH)
        }
    }

    pub fn contains(&self, pitch: u8) -> bool {
        (self.low..=self.high).contains(&pitch)
    }

    pub fn rect(&self, note: &DrawnNote, at: Instant) -> Option<NoteRect> {
        if !self.contains(note.pitch) {
            return None;
        }
        let (x, width) = self.lane(note.pitch);
        let top = self.height - self.travelled(note.created, at);
        let bottom = match note.ended {
            Some(ended) => self.height - self.travelled(ended, at),
            None => self.height,
        };
        Some(NoteRect {
            x,
            y: top,
            width,
            height: (bottom - top).max(NOTE_MIN_HEIGHT),
        })
    }

    /// Whether the note's tail has risen past the top edge.
    pub fn is_offscreen(&self, note: &DrawnNote, at: Instant) -> bool {
        match note.ended {
            Some(ended) => self.height - self.travelled(ended, at) + NOTE_MIN_HEIGHT < 0.0,
            None => false,
        }
    }

    /// How long an ended note stays visible.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs_f32((self.height + NOTE_MIN_HEIGHT) / self.speed.max(f32::EPSILON))
    }

    /// Key under a point of the on-screen keyboard. Black keys win in the
    /// upper part of the keyboard.
    pub fn pitch_at(&self, x: f32, upper: bool) -> Option<u8> {
        let hit = |pitch: &u8| {
            let (left, width) = self.lane(*pitch);
            x >= left && x < left + width
        };
        if upper {
            if let Some(pitch) = (self.low..=self.high).filter(|p| note::is_black(*p)).find(hit) {
                return Some(pitch);
            }
        }
        (self.low..=self.high).filter(|p| !note::is_black(*p)).find(hit)
    }

    /// White-key index the canvas starts at. A black `low` key straddles
    /// the white key below it, so that key's lane is kept.
    fn first_white(&self) -> u8 {
        let before = note::white_keys_before(self.low);
        if note::is_black(self.low) {
            before.saturating_sub(1)
        } else {
            before
        }
    }

    fn travelled(&self, since: Instant, at: Instant) -> f32 {
        at.saturating_duration_since(since).as_secs_f32() * self.speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{DrawnNoteId, Lane, Player};
    use crate::color::Rgb;

    fn drawn(pitch: u8, created: Instant, ended: Option<Instant>) -> DrawnNote {
        DrawnNote {
            id: DrawnNoteId(0),
            player: Player::Local,
            pitch,
            velocity: 0.5,
            color: Rgb::LOCAL_NATURAL,
            lane: Lane::for_pitch(pitch),
            created,
            ended,
        }
    }

    #[test]
    fn full_piano_width() {
        let layout = WaterfallLayout::default();
        assert_eq!(layout.width(), 52.0 * NOTE_WIDTH);
    }

    #[test]
    fn lanes_line_up_with_white_keys() {
        let layout = WaterfallLayout::default();
        assert_eq!(layout.lane(21), (0.0, NOTE_WIDTH));
        assert_eq!(layout.lane(23), (NOTE_WIDTH, NOTE_WIDTH));
        // A#0 sits between A0 and B0
        assert_eq!(layout.lane(22), (20.0, BLACK_NOTE_WIDTH));
    }

    #[test]
    fn held_note_grows_from_the_bottom() {
        let layout = WaterfallLayout::default();
        let t0 = Instant::now();
        let note = drawn(60, t0, None);
        let rect = layout.rect(&note, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(rect.y, 400.0 - NOTE_SPEED);
        assert_eq!(rect.height, NOTE_SPEED);
        assert!(!layout.is_offscreen(&note, t0 + Duration::from_secs(60)));
    }

    #[test]
    fn ended_note_rises_and_leaves() {
        let layout = WaterfallLayout::default();
        let t0 = Instant::now();
        let note = drawn(60, t0, Some(t0 + Duration::from_millis(500)));
        let rect = layout.rect(&note, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(rect.height, NOTE_SPEED / 2.0);
        assert_eq!(rect.y + rect.height, 400.0 - NOTE_SPEED / 2.0);

        assert!(!layout.is_offscreen(&note, t0 + Duration::from_secs(3)));
        assert!(layout.is_offscreen(&note, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn short_notes_keep_a_minimum_height() {
        let layout = WaterfallLayout::default();
        let t0 = Instant::now();
        let note = drawn(60, t0, Some(t0));
        assert_eq!(layout.rect(&note, t0).unwrap().height, NOTE_MIN_HEIGHT);
    }

    #[test]
    fn out_of_range_notes_are_hidden() {
        let layout = WaterfallLayout {
            low: 48,
            high: 72,
            ..WaterfallLayout::default()
        };
        assert!(layout.rect(&drawn(30, Instant::now(), None), Instant::now()).is_none());
    }

    #[test]
    fn keyboard_hit_testing() {
        let layout = WaterfallLayout {
            low: 60,
            high: 71,
            ..WaterfallLayout::default()
        };
        assert_eq!(layout.pitch_at(5.0, false), Some(60));
        assert_eq!(layout.pitch_at(25.0, true), Some(61));
        assert_eq!(layout.pitch_at(25.0, false), Some(60));
        assert_eq!(layout.pitch_at(35.0, true), Some(61));
        assert_eq!(layout.pitch_at(45.0, true), Some(62));
        assert_eq!(layout.pitch_at(1000.0, false), None);
    }

    #[test]
    fn black_lowest_key_stays_on_the_canvas() {
        // Db4 to C5
        let layout = WaterfallLayout {
            low: 61,
            high: 72,
            ..WaterfallLayout::default()
        };
        let (x, width) = layout.lane(61);
        assert_eq!((x, width), (20.0, BLACK_NOTE_WIDTH));
        // C4's lane is kept under it, up to C5
        assert_eq!(layout.width(), 8.0 * NOTE_WIDTH);
        assert_eq!(layout.lane(72), (7.0 * NOTE_WIDTH, NOTE_WIDTH));
        assert_eq!(layout.pitch_at(25.0, true), Some(61));
    }
}
