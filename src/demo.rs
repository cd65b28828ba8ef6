//! Random tracks for trying the room without an instrument.

use rand::Rng;

use crate::recording::{EventKind, Track, TrackEvent};

/// Longest silence between two demo notes.
pub const MAX_GAP_MS: f64 = 500.0;
pub const NOTE_LENGTH_MS: u64 = 100;

/// Builds `notes` short notes climbing through the MIDI range, separated by
/// random gaps.
pub fn random_track<R: Rng + ?Sized>(notes: usize, rng: &mut R) -> Track {
    let mut events = Vec::with_capacity(notes * 2);
    let mut end = 0u64;

    for i in 0..notes {
        let pitch = (i % 119) as u8 + 12;
        let start = end + (rng.gen::<f64>() * MAX_GAP_MS) as u64;
        end = start + NOTE_LENGTH_MS;
        events.push(TrackEvent {
            kind: EventKind::NoteOn,
            pitch,
            velocity: 0.5,
            time_ms: start,
        });
        events.push(TrackEvent {
            kind: EventKind::NoteOff,
            pitch,
            velocity: 0.0,
            time_ms: end,
        });
    }

    Track::new(format!("Demo ({} notes)", notes), events, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn notes_climb_and_wrap() {
        let mut rng = StdRng::seed_from_u64(7);
        let track = random_track(121, &mut rng);
        let pitches: Vec<u8> = track
            .events
            .iter()
            .filter(|e| e.kind == EventKind::NoteOn)
            .map(|e| e.pitch)
            .collect();
        assert_eq!(pitches.len(), 121);
        assert_eq!(pitches[0], 12);
        assert_eq!(pitches[118], 130);
        assert_eq!(pitches[119], 12);
        assert!(pitches.iter().all(|&p| p < 128));
    }

    #[test]
    fn notes_are_short_and_never_overlap() {
        let mut rng = StdRng::seed_from_u64(42);
        let track = random_track(20, &mut rng);
        let mut previous_end = 0;
        for pair in track.events.chunks(2) {
            let (on, off) = (pair[0], pair[1]);
            assert_eq!(off.time_ms - on.time_ms, NOTE_LENGTH_MS);
            assert!(on.time_ms >= previous_end);
            assert!(on.time_ms - previous_end < MAX_GAP_MS as u64);
            previous_end = off.time_ms;
        }
        assert_eq!(track.duration_ms, previous_end);
    }

    #[test]
    fn empty_demo() {
        let track = random_track(0, &mut StdRng::seed_from_u64(1));
        assert!(track.is_empty());
        assert_eq!(track.duration_ms, 0);
    }
}
