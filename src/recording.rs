use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const IDLE_MESSAGE: &str = "Play some notes...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NoteOn,
    NoteOff,
}

/// One entry of a recorded timeline. `time_ms` is relative to the first
/// note-on of the recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub pitch: u8,
    pub velocity: f32,
    #[serde(rename = "time")]
    pub time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    /// Unix time in milliseconds
    pub recorded_at: u64,
    pub duration_ms: u64,
    pub events: Vec<TrackEvent>,
}

impl Track {
    pub fn new(name: impl Into<String>, events: Vec<TrackEvent>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            recorded_at: unix_millis(),
            duration_ms,
            events,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Default)]
enum RecorderState {
    #[default]
    Idle,
    Recording {
        started: Instant,
        /// Time zero of the track, set by the first note-on
        first: Option<Instant>,
    },
}

/// Captures note events into a [`Track`].
#[derive(Debug, Default)]
pub struct Recorder {
    state: RecorderState,
    events: Vec<TrackEvent>,
    takes: u32,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    /// Clears the current track and starts the timer.
    pub fn start(&mut self, at: Instant) {
        self.events.clear();
        self.state = RecorderState::Recording {
            started: at,
            first: None,
        };
    }

    /// Stops recording and hands back the track. `None` when not recording.
    pub fn stop(&mut self, at: Instant) -> Option<Track> {
        let RecorderState::Recording { first, .. } = std::mem::take(&mut self.state) else {
            return None;
        };
        self.takes += 1;
        let duration_ms = first.map_or(0, |first| millis_between(first, at));
        Some(Track::new(
            format!("Recording {}", self.takes),
            std::mem::take(&mut self.events),
            duration_ms,
        ))
    }

    pub fn note_on(&mut self, pitch: u8, velocity: f32, at: Instant) {
        let RecorderState::Recording { first, .. } = &mut self.state else {
            return;
        };
        let zero = *first.get_or_insert(at);
        self.events.push(TrackEvent {
            kind: EventKind::NoteOn,
            pitch,
            velocity,
            time_ms: millis_between(zero, at),
        });
    }

    /// Note-offs before the first note-on have nothing to close and are dropped.
    pub fn note_off(&mut self, pitch: u8, at: Instant) {
        let RecorderState::Recording { first: Some(zero), .. } = self.state else {
            return;
        };
        self.events.push(TrackEvent {
            kind: EventKind::NoteOff,
            pitch,
            velocity: 0.0,
            time_ms: millis_between(zero, at),
        });
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    /// Elapsed recording time as `HH:MM:SS`, or the idle prompt.
    pub fn status_message(&self, at: Instant) -> String {
        match self.state {
            RecorderState::Recording { started, .. } => format_time(millis_between(started, at)),
            RecorderState::Idle => IDLE_MESSAGE.to_string(),
        }
    }
}

/// Formats a duration in milliseconds as zero-padded `HH:MM:SS`.
pub fn format_time(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60)
}

fn millis_between(earlier: Instant, later: Instant) -> u64 {
    later.saturating_duration_since(earlier).as_millis() as u64
}

pub fn unix_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
