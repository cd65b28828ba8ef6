use crate::note;
use thiserror::Error;

pub const NOTE_OFF: u8 = 8;
pub const NOTE_ON: u8 = 9;
pub const CONTROL_CHANGE: u8 = 11;
pub const SUSTAIN_PEDAL: u8 = 64;
/// Active sensing keep-alive, never forwarded to the thru port.
pub const ACTIVE_SENSING: u8 = 0xFE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MidiError {
    #[error("MIDI message too short: {0} bytes")]
    Truncated(usize),
    #[error("MIDI device error: {0}")]
    Device(String),
    #[error("no MIDI port matching {0:?}")]
    PortNotFound(String),
    #[error("no MIDI input devices found")]
    NoInputs,
}

/// A channel message split into its fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiMessage {
    pub command: u8,
    pub channel: u8,
    pub pitch: u8,
    /// Data byte 2 scaled to 0.0..=1.0
    pub velocity: f32,
}

/// What a message means for the room.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiAction {
    NoteOn { pitch: u8, velocity: f32 },
    NoteOff { pitch: u8 },
    Sustain(bool),
    Ignored,
}

impl MidiMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, MidiError> {
        match bytes {
            [status, pitch, velocity, ..] => Ok(Self {
                command: status >> 4,
                channel: status & 0x0F,
                pitch: *pitch,
                velocity: *velocity as f32 / 127.0,
            }),
            _ => Err(MidiError::Truncated(bytes.len())),
        }
    }

    /// Classifies the message, shifting note pitches by `transposition` octaves.
    pub fn action(&self, transposition: i8) -> MidiAction {
        match self.command {
            CONTROL_CHANGE if self.pitch == SUSTAIN_PEDAL => MidiAction::Sustain(self.velocity >= 1.0),
            NOTE_OFF | NOTE_ON => match note::transpose(self.pitch, transposition) {
                Some(pitch) if self.command == NOTE_OFF || self.velocity == 0.0 => {
                    MidiAction::NoteOff { pitch }
                }
                Some(pitch) => MidiAction::NoteOn {
                    pitch,
                    velocity: self.velocity,
                },
                None => MidiAction::Ignored,
            },
            _ => MidiAction::Ignored,
        }
    }
}

/// Whether a raw message should be echoed to the thru port.
pub fn should_forward(bytes: &[u8]) -> bool {
    bytes.first().is_some_and(|status| *status != ACTIVE_SENSING)
}

/// Which input port the listener should use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InputChoice {
    #[default]
    FirstAvailable,
    Named(String),
    Off,
}

impl InputChoice {
    pub fn label(&self) -> &str {
        match self {
            InputChoice::FirstAvailable => "First available",
            InputChoice::Named(name) => name,
            InputChoice::Off => "None",
        }
    }
}

/// The MIDI ports picked on the command line or in the settings panel. The
/// listener reconnects whenever this changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MidiSelection {
    pub input: InputChoice,
    /// Thru port receiving everything played on the input
    pub output: Option<String>,
}

impl MidiSelection {
    pub fn new(input: Option<String>, output: Option<String>, disabled: bool) -> Self {
        let input = match input {
            _ if disabled => InputChoice::Off,
            Some(name) => InputChoice::Named(name),
            None => InputChoice::FirstAvailable,
        };
        Self { input, output }
    }

    /// Index of the input port to open among `names`.
    pub fn pick_input(&self, names: &[String]) -> Option<usize> {
        match &self.input {
            InputChoice::FirstAvailable if !names.is_empty() => Some(0),
            InputChoice::FirstAvailable | InputChoice::Off => None,
            InputChoice::Named(wanted) => pick_port(names, wanted),
        }
    }
}

/// Exact name first, then the first name containing `wanted`.
pub fn pick_port(names: &[String], wanted: &str) -> Option<usize> {
    names
        .iter()
        .position(|name| name == wanted)
        .or_else(|| names.iter().position(|name| name.contains(wanted)))
}

#[cfg(feature = "midi-io")]
pub use device::{list_ports, run_midi_listener, MidiPorts};

#[cfg(feature = "midi-io")]
mod device {
    use super::{pick_port, should_forward, InputChoice, MidiError, MidiSelection};
    use crate::state::AppState;
    use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tracing::{debug, error, info, warn};

    /// How often a missing device is looked for again.
    const RESCAN_INTERVAL: Duration = Duration::from_secs(2);

    type Listener = MidiInputConnection<(Arc<AppState>, Option<MidiOutputConnection>)>;

    /// Names of the ports currently visible to the system.
    #[derive(Debug, Clone, Default)]
    pub struct MidiPorts {
        pub inputs: Vec<String>,
        pub outputs: Vec<String>,
    }

    pub fn list_ports() -> Result<MidiPorts, MidiError> {
        let input = MidiInput::new("piano_room ports").map_err(|e| MidiError::Device(e.to_string()))?;
        let output = MidiOutput::new("piano_room ports").map_err(|e| MidiError::Device(e.to_string()))?;
        let unknown = |_| "Unknown".to_string();
        Ok(MidiPorts {
            inputs: input
                .ports()
                .iter()
                .map(|p| input.port_name(p).unwrap_or_else(unknown))
                .collect(),
            outputs: output
                .ports()
                .iter()
                .map(|p| output.port_name(p).unwrap_or_else(unknown))
                .collect(),
        })
    }

    fn connect_output(wanted: &str) -> Result<MidiOutputConnection, MidiError> {
        let output = MidiOutput::new("piano_room thru").map_err(|e| MidiError::Device(e.to_string()))?;
        let ports = output.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| output.port_name(p).unwrap_or_default())
            .collect();
        let index = pick_port(&names, wanted).ok_or_else(|| MidiError::PortNotFound(wanted.to_string()))?;
        output
            .connect(&ports[index], "piano_room thru")
            .map_err(|e| MidiError::Device(e.to_string()))
    }

    /// Opens the selected input, wired to the room and the thru port.
    fn open(state: &Arc<AppState>, selection: &MidiSelection) -> Result<Option<Listener>, MidiError> {
        if selection.input == InputChoice::Off {
            return Ok(None);
        }
        let mut midi_input = MidiInput::new("piano_room input").map_err(|e| MidiError::Device(e.to_string()))?;
        midi_input.ignore(Ignore::None);

        let in_ports = midi_input.ports();
        let names: Vec<String> = in_ports
            .iter()
            .map(|p| midi_input.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();
        for (i, name) in names.iter().enumerate() {
            debug!("MIDI input port {}: {}", i, name);
        }
        let index = selection.pick_input(&names).ok_or_else(|| match &selection.input {
            InputChoice::Named(wanted) => MidiError::PortNotFound(wanted.clone()),
            _ => MidiError::NoInputs,
        })?;
        info!("Using MIDI input: {}", names[index]);

        let thru = selection.output.as_deref().and_then(|wanted| match connect_output(wanted) {
            Ok(conn) => {
                info!("Forwarding MIDI to output: {}", wanted);
                Some(conn)
            }
            Err(e) => {
                warn!("MIDI thru disabled: {}", e);
                None
            }
        });

        midi_input
            .connect(
                &in_ports[index],
                "piano_room listener",
                move |_, message, data: &mut (Arc<AppState>, Option<MidiOutputConnection>)| {
                    let (state, thru) = data;
                    if let Some(out) = thru.as_mut() {
                        if should_forward(message) {
                            if let Err(e) = out.send(message) {
                                debug!("MIDI thru send failed: {}", e);
                            }
                        }
                    }
                    state.with_room(|room| room.handle_midi(message, Instant::now()));
                },
                (state.clone(), thru),
            )
            .map(Some)
            .map_err(|e| MidiError::Device(e.to_string()))
    }

    /// Listens to the selected MIDI input and feeds its messages into the
    /// room, reconnecting whenever the selection changes. A missing device
    /// is looked for again every [`RESCAN_INTERVAL`].
    pub async fn run_midi_listener(state: Arc<AppState>) {
        let result = tokio::task::spawn_blocking(move || {
            let mut last_error = None;
            while !state.is_shutting_down() {
                let selection = state.midi_selection();
                let connection = match open(&state, &selection) {
                    Ok(connection) => {
                        if connection.is_some() {
                            info!("MIDI listener connected and running");
                        }
                        last_error = None;
                        connection
                    }
                    Err(e) => {
                        if last_error.as_ref() != Some(&e) {
                            warn!("{}", e);
                        }
                        last_error = Some(e);
                        None
                    }
                };

                // Keep the connection alive until shutdown or a new selection
                let opened = Instant::now();
                while !state.is_shutting_down() && state.midi_selection() == selection {
                    if last_error.is_some() && opened.elapsed() >= RESCAN_INTERVAL {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                if let Some(connection) = connection {
                    connection.close();
                    debug!("MIDI input closed");
                }
            }
        })
        .await;

        if let Err(e) = result {
            error!("MIDI listener task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_note_on() {
        let msg = MidiMessage::parse(&[0x90, 60, 64]).unwrap();
        assert_eq!(msg.command, 9);
        assert_eq!(msg.channel, 0);
        assert_eq!(msg.pitch, 60);
        assert!((msg.velocity - 0.504).abs() < 1e-3);
    }

    #[test]
    fn reads_channel_nibble() {
        let msg = MidiMessage::parse(&[0x8A, 72, 0]).unwrap();
        assert_eq!(msg.command, 8);
        assert_eq!(msg.channel, 10);
        assert_eq!(msg.action(0), MidiAction::NoteOff { pitch: 72 });
    }

    #[test]
    fn short_messages_are_rejected() {
        assert_eq!(MidiMessage::parse(&[0xFE]), Err(MidiError::Truncated(1)));
        assert_eq!(MidiMessage::parse(&[]), Err(MidiError::Truncated(0)));
    }

    #[test]
    fn note_on_with_zero_velocity_is_note_off() {
        let msg = MidiMessage::parse(&[0x90, 60, 0]).unwrap();
        assert_eq!(msg.action(0), MidiAction::NoteOff { pitch: 60 });
    }

    #[test]
    fn transposes_by_octaves() {
        let msg = MidiMessage::parse(&[0x90, 60, 127]).unwrap();
        assert_eq!(msg.action(1), MidiAction::NoteOn { pitch: 72, velocity: 1.0 });
        assert_eq!(msg.action(-1), MidiAction::NoteOn { pitch: 48, velocity: 1.0 });

        let high = MidiMessage::parse(&[0x90, 120, 100]).unwrap();
        assert_eq!(high.action(1), MidiAction::Ignored);
    }

    #[test]
    fn sustain_pedal_needs_full_value() {
        let down = MidiMessage::parse(&[0xB0, 64, 127]).unwrap();
        let half = MidiMessage::parse(&[0xB0, 64, 90]).unwrap();
        let other = MidiMessage::parse(&[0xB0, 1, 127]).unwrap();
        assert_eq!(down.action(0), MidiAction::Sustain(true));
        assert_eq!(half.action(0), MidiAction::Sustain(false));
        assert_eq!(other.action(0), MidiAction::Ignored);
    }

    #[test]
    fn pitch_bend_is_ignored() {
        let msg = MidiMessage::parse(&[0xE0, 0, 64]).unwrap();
        assert_eq!(msg.action(0), MidiAction::Ignored);
    }

    #[test]
    fn thru_skips_active_sensing() {
        assert!(should_forward(&[0x90, 60, 64]));
        assert!(!should_forward(&[ACTIVE_SENSING]));
        assert!(!should_forward(&[]));
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selection_from_command_line() {
        assert_eq!(MidiSelection::new(None, None, false).input, InputChoice::FirstAvailable);
        assert_eq!(
            MidiSelection::new(Some("Keys".into()), Some("Synth".into()), false),
            MidiSelection {
                input: InputChoice::Named("Keys".into()),
                output: Some("Synth".into()),
            }
        );
        assert_eq!(MidiSelection::new(Some("Keys".into()), None, true).input, InputChoice::Off);
    }

    #[test]
    fn picks_the_selected_input() {
        let ports = names(&["Keys 2", "Keys", "Pads"]);
        let mut selection = MidiSelection::default();
        assert_eq!(selection.pick_input(&ports), Some(0));
        assert_eq!(selection.pick_input(&[]), None);

        selection.input = InputChoice::Named("Keys".into());
        assert_eq!(selection.pick_input(&ports), Some(1));
        selection.input = InputChoice::Named("Pad".into());
        assert_eq!(selection.pick_input(&ports), Some(2));
        selection.input = InputChoice::Named("Drums".into());
        assert_eq!(selection.pick_input(&ports), None);
        selection.input = InputChoice::Off;
        assert_eq!(selection.pick_input(&ports), None);
    }

    #[test]
    fn input_labels() {
        assert_eq!(InputChoice::FirstAvailable.label(), "First available");
        assert_eq!(InputChoice::Named("Keys".into()).label(), "Keys");
        assert_eq!(InputChoice::Off.label(), "None");
    }
}
