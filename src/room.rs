use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::Sender;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::board::{InputSource, NoteBoard, Player, Pressed, Released};
use crate::midi::{MidiAction, MidiMessage};
use crate::protocol::RoomEvent;
use crate::recording::{EventKind, Recorder, Track, TrackEvent};

pub const MAX_TRANSPOSITION: i8 = 3;

/// Whatever turns key presses into sound.
pub trait Instrument: Send {
    fn key_down(&mut self, pitch: u8, velocity: f32);
    fn key_up(&mut self, pitch: u8);
    fn sustain(&mut self, down: bool);
}

/// One participant's view of a room: merges local input and peer events
/// into the note board, drives the instrument, and records.
pub struct Room {
    name: String,
    user: String,
    board: NoteBoard,
    recorder: Recorder,
    /// Who holds each pitch as far as the current take is concerned,
    /// independent of which source started the sounding note.
    recorded: BTreeMap<u8, BTreeSet<(Player, InputSource)>>,
    transposition: i8,
    record_remote: bool,
    connected: bool,
    instrument: Box<dyn Instrument>,
    outbox: Option<Sender<RoomEvent>>,
}

impl Room {
    pub fn new(name: impl Into<String>, user: impl Into<String>, instrument: Box<dyn Instrument>) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            board: NoteBoard::new(),
            recorder: Recorder::new(),
            recorded: BTreeMap::new(),
            transposition: 0,
            record_remote: false,
            connected: false,
            instrument,
            outbox: None,
        }
    }

    /// Events for peers are queued here once the room is linked to a server.
    pub fn attach_outbox(&mut self, outbox: Sender<RoomEvent>) {
        self.outbox = Some(outbox);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn board(&self) -> &NoteBoard {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut NoteBoard {
        &mut self.board
    }

    pub fn transposition(&self) -> i8 {
        self.transposition
    }

    pub fn set_transposition(&mut self, octaves: i8) {
        self.transposition = octaves.clamp(-MAX_TRANSPOSITION, MAX_TRANSPOSITION);
    }

    pub fn set_record_remote(&mut self, record_remote: bool) {
        self.record_remote = record_remote;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn join_event(&self) -> RoomEvent {
        RoomEvent::Join {
            room: self.name.clone(),
            user: self.user.clone(),
        }
    }

    pub fn set_connected(&mut self, connected: bool, at: Instant) {
        if self.connected && !connected {
            // Peers can no longer send their note-offs
            for player in self.board.remote_players() {
                self.release_player(&player, at);
            }
        }
        self.connected = connected;
    }

    pub fn play_note(&mut self, source: InputSource, pitch: u8, velocity: f32, at: Instant) {
        self.press(Player::Local, source, pitch, velocity, at);
    }

    pub fn stop_note(&mut self, source: InputSource, pitch: u8, at: Instant) {
        self.release(Player::Local, source, pitch, at);
    }

    pub fn handle_midi(&mut self, bytes: &[u8], at: Instant) {
        let message = match MidiMessage::parse(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping MIDI message {:?}: {}", bytes, e);
                return;
            }
        };
        match message.action(self.transposition) {
            MidiAction::NoteOn { pitch, velocity } => self.play_note(InputSource::Midi, pitch, velocity, at),
            MidiAction::NoteOff { pitch } => self.stop_note(InputSource::Midi, pitch, at),
            MidiAction::Sustain(down) => self.instrument.sustain(down),
            MidiAction::Ignored => {}
        }
    }

    /// Applies a message from the room server.
    pub fn handle_remote(&mut self, event: RoomEvent, at: Instant) {
        match event {
            RoomEvent::NoteOn { pitch, velocity, player } if pitch < 128 => {
                self.press(Player::remote(player), InputSource::Socket, pitch, velocity.clamp(0.0, 1.0), at);
            }
            RoomEvent::NoteOff { pitch, player } if pitch < 128 => {
                self.release(Player::remote(player), InputSource::Socket, pitch, at);
            }
            RoomEvent::Leave { player } => {
                let player = Player::remote(player);
                info!("{:?} left {}", player, self.name);
                self.release_player(&player, at);
            }
            RoomEvent::Ping => self.emit(RoomEvent::Pong),
            other => debug!("Ignoring room event {:?}", other),
        }
    }

    /// Plays back one event of a recorded track as the local player.
    pub fn apply_track_event(&mut self, event: &TrackEvent, at: Instant) {
        match event.kind {
            EventKind::NoteOn => self.play_note(InputSource::Playback, event.pitch, event.velocity, at),
            EventKind::NoteOff => self.stop_note(InputSource::Playback, event.pitch, at),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn start_recording(&mut self, at: Instant) {
        info!("Recording started");
        self.recorded.clear();
        self.recorder.start(at);
    }

    pub fn stop_recording(&mut self, at: Instant) -> Option<Track> {
        self.recorded.clear();
        let track = self.recorder.stop(at)?;
        info!("Recording stopped: {} events, {} ms", track.events.len(), track.duration_ms);
        Some(track)
    }

    pub fn status_message(&self, at: Instant) -> String {
        self.recorder.status_message(at)
    }

    fn press(&mut self, player: Player, source: InputSource, pitch: u8, velocity: f32, at: Instant) {
        let pressed = self.board.press(&player, source, pitch, velocity, at);
        if let Pressed::Started(_) | Pressed::Retriggered(_) = pressed {
            self.instrument.key_down(pitch, velocity);
            if player == Player::Local {
                self.emit(RoomEvent::note_on(pitch, velocity));
            }
        }
        self.record_press(player, source, pitch, velocity, at);
    }

    fn release(&mut self, player: Player, source: InputSource, pitch: u8, at: Instant) {
        match self.board.release(&player, source, pitch, at) {
            Released::Ended { silenced, .. } => {
                if silenced {
                    self.instrument.key_up(pitch);
                }
                if player == Player::Local {
                    self.emit(RoomEvent::note_off(pitch));
                }
            }
            Released::StillHeld | Released::NotHeld => {}
        }
        self.record_release(&player, source, pitch, at);
    }

    fn release_player(&mut self, player: &Player, at: Instant) {
        for pitch in self.board.release_player(player, at) {
            self.instrument.key_up(pitch);
        }
        let pitches: Vec<u8> = self
            .recorded
            .iter()
            .filter(|(_, holders)| holders.iter().any(|(p, _)| p == player))
            .map(|(pitch, _)| *pitch)
            .collect();
        for pitch in pitches {
            if let Some(holders) = self.recorded.get_mut(&pitch) {
                holders.retain(|(p, _)| p != player);
                if holders.is_empty() {
                    self.recorded.remove(&pitch);
                    self.recorder.note_off(pitch, at);
                }
            }
        }
    }

    /// The take sees a pitch start when its first recorded holder presses
    /// it, and again whenever a holder presses it twice.
    fn record_press(&mut self, player: Player, source: InputSource, pitch: u8, velocity: f32, at: Instant) {
        if !self.recorder.is_recording() || !self.should_record(source) {
            return;
        }
        let holders = self.recorded.entry(pitch).or_default();
        let first = holders.is_empty();
        let again = !holders.insert((player, source));
        if first || again {
            self.recorder.note_on(pitch, velocity, at);
        }
    }

    /// The take sees a pitch end once its last recorded holder lets go.
    fn record_release(&mut self, player: &Player, source: InputSource, pitch: u8, at: Instant) {
        let Some(holders) = self.recorded.get_mut(&pitch) else {
            return;
        };
        if !holders.remove(&(player.clone(), source)) {
            return;
        }
        if holders.is_empty() {
            self.recorded.remove(&pitch);
            self.recorder.note_off(pitch, at);
        }
    }

    fn should_record(&self, source: InputSource) -> bool {
        source.is_performance() || (self.record_remote && source == InputSource::Socket)
    }

    fn emit(&mut self, event: RoomEvent) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        if outbox.send(event).is_err() {
            warn!("Room link is gone, notes stay local from now on");
            self.outbox = None;
        }
    }
}
