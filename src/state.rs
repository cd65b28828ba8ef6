use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::audio::VoiceBank;
use crate::library::{RecordingLibrary, RecordingSummary};
use crate::midi::MidiSelection;
use crate::playback::{spawn_playback, PlaybackHandle};
use crate::recording::Track;
use crate::room::Room;

/// Centralized state shared across MIDI, audio, network and UI components.
pub struct AppState {
    room: Mutex<Room>,

    /// Voices rendered by the audio callback.
    pub voices: Arc<Mutex<VoiceBank>>,

    looping: Arc<AtomicBool>,
    playback: Mutex<Option<PlaybackHandle>>,
    last_track: Mutex<Option<Track>>,
    library: Option<RecordingLibrary>,
    midi: Mutex<MidiSelection>,
    runtime: Option<Handle>,
    shutdown: AtomicBool,
}

impl AppState {
    /// Create a new `AppState` around a room. Must be called from inside a
    /// tokio runtime for playback to work.
    pub fn new(room: Room, voices: Arc<Mutex<VoiceBank>>, library: Option<RecordingLibrary>) -> Arc<Self> {
        Arc::new(Self {
            room: Mutex::new(room),
            voices,
            looping: Arc::new(AtomicBool::new(false)),
            playback: Mutex::new(None),
            last_track: Mutex::new(None),
            library,
            midi: Mutex::new(MidiSelection::default()),
            runtime: Handle::try_current().ok(),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn with_room<R>(&self, f: impl FnOnce(&mut Room) -> R) -> R {
        f(&mut self.room.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_volume(&self, volume: f32) {
        self.voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.voices.lock().unwrap_or_else(PoisonError::into_inner).volume()
    }

    pub fn midi_selection(&self) -> MidiSelection {
        self.midi.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Points the MIDI listener at other ports.
    pub fn set_midi_selection(&self, selection: MidiSelection) {
        let mut current = self.midi.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != selection {
            info!("MIDI input: {}, thru: {}", selection.input.label(), selection.output.as_deref().unwrap_or("none"));
            *current = selection;
        }
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub fn toggle_looping(&self) -> bool {
        !self.looping.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn start_recording(&self) {
        self.with_room(|room| room.start_recording(Instant::now()));
    }

    /// Stops recording, keeps the take for playback and saves it when a
    /// library is configured.
    pub fn stop_recording(&self) -> Option<Track> {
        let track = self.with_room(|room| room.stop_recording(Instant::now()))?;
        if track.is_empty() {
            info!("Nothing was played, discarding the take");
            return None;
        }
        if let Some(library) = &self.library {
            match library.save(&track) {
                Ok(path) => info!("Saved {} to {}", track.name, path.display()),
                Err(e) => warn!("Could not save recording: {}", e),
            }
        }
        *self.last_track.lock().unwrap_or_else(PoisonError::into_inner) = Some(track.clone());
        Some(track)
    }

    pub fn last_track(&self) -> Option<Track> {
        self.last_track
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn recordings(&self) -> Vec<RecordingSummary> {
        let Some(library) = &self.library else {
            return Vec::new();
        };
        library.list().unwrap_or_else(|e| {
            warn!("Could not list recordings: {}", e);
            Vec::new()
        })
    }

    pub fn load_recording(&self, summary: &RecordingSummary) -> Option<Track> {
        let library = self.library.as_ref()?;
        library
            .load(&summary.path)
            .map_err(|e| warn!("Could not load recording: {}", e))
            .ok()
    }

    /// Replays a track into the room as the local player, replacing any
    /// playback in progress.
    pub fn play_track(self: &Arc<Self>, track: Track) {
        let Some(runtime) = &self.runtime else {
            warn!("No async runtime, cannot play {}", track.name);
            return;
        };
        self.stop_playback();

        let weak = Arc::downgrade(self);
        let _guard = runtime.enter();
        let handle = spawn_playback(track, self.looping.clone(), move |event| {
            if let Some(state) = weak.upgrade() {
                state.with_room(|room| room.apply_track_event(event, Instant::now()));
            }
        });
        *self.playback.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn stop_playback(&self) {
        if let Some(handle) = self.playback.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn shutdown(&self) {
        self.stop_playback();
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Synth;
    use crate::board::InputSource;
    use crate::midi::InputChoice;
    use crate::recording::{EventKind, TrackEvent};
    use std::time::Duration;
    use tempfile::tempdir;

    fn state(library: Option<RecordingLibrary>) -> Arc<AppState> {
        let voices = Arc::new(Mutex::new(VoiceBank::new(0.5)));
        let room = Room::new("BellaRoom", "ada", Box::new(Synth::new(voices.clone())));
        AppState::new(room, voices, library)
    }

    #[tokio::test]
    async fn recording_is_saved_and_kept() {
        let dir = tempdir().expect("Failed to create temp dir");
        let library = RecordingLibrary::open(dir.path()).unwrap();
        let state = state(Some(library));

        state.start_recording();
        state.with_room(|room| {
            let t0 = Instant::now();
            room.play_note(InputSource::Mouse, 60, 0.5, t0);
            room.stop_note(InputSource::Mouse, 60, t0 + Duration::from_millis(50));
        });
        let track = state.stop_recording().unwrap();

        assert_eq!(state.last_track(), Some(track.clone()));
        let listed = state.recordings();
        assert_eq!(listed.len(), 1);
        assert_eq!(state.load_recording(&listed[0]), Some(track));
    }

    #[tokio::test]
    async fn empty_takes_are_discarded() {
        let state = state(None);
        state.start_recording();
        assert!(state.stop_recording().is_none());
        assert!(state.last_track().is_none());
        assert!(state.recordings().is_empty());
    }

    #[tokio::test]
    async fn midi_selection_is_shared() {
        let state = state(None);
        assert_eq!(state.midi_selection(), MidiSelection::default());

        let chosen = MidiSelection::new(Some("Keys".into()), Some("Synth".into()), false);
        state.set_midi_selection(chosen.clone());
        assert_eq!(state.midi_selection(), chosen);

        state.set_midi_selection(MidiSelection::new(None, None, true));
        assert_eq!(state.midi_selection().input, InputChoice::Off);
    }

    #[tokio::test]
    async fn toggling_loop() {
        let state = state(None);
        assert!(!state.is_looping());
        assert!(state.toggle_looping());
        assert!(state.is_looping());
        assert!(!state.toggle_looping());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_reaches_the_board() {
        let state = state(None);
        let track = Track::new(
            "short",
            vec![TrackEvent {
                kind: EventKind::NoteOn,
                pitch: 67,
                velocity: 0.5,
                time_ms: 0,
            }],
            200,
        );
        state.play_track(track);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(state.is_playing());
        assert!(state.with_room(|room| room.board().is_sounding(67)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!state.is_playing());
        assert!(!state.with_room(|room| room.board().is_sounding(67)));
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_playback_releases_notes() {
        let state = state(None);
        assert!(state.toggle_looping());
        let track = Track::new(
            "held",
            vec![TrackEvent {
                kind: EventKind::NoteOn,
                pitch: 67,
                velocity: 0.5,
                time_ms: 0,
            }],
            1_000,
        );
        state.play_track(track);
        tokio::time::sleep(Duration::from_millis(100)).await;
        state.stop_playback();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!state.is_playing());
        assert!(!state.with_room(|room| room.board().is_sounding(67)));
    }
}
