use std::sync::Arc;
use std::time::Instant;

use eframe::{App, CreationContext};
use egui::{
    pos2, vec2, CentralPanel, Color32, Context, Event, Painter, Pos2, Rect, ScrollArea, Sense, SidePanel, Slider,
    Stroke, TopBottomPanel, Ui,
};
#[cfg(feature = "midi-io")]
use tracing::warn;

use crate::board::{InputSource, Player};
use crate::color::{NoteColors, Rgb};
use crate::keymap::{ComputerKeys, KeyAction};
use crate::library::RecordingSummary;
#[cfg(feature = "midi-io")]
use crate::midi::{self, InputChoice, MidiPorts};
use crate::note;
use crate::recording::format_time;
use crate::room::MAX_TRANSPOSITION;
use crate::state::AppState;
use crate::waterfall::{WaterfallLayout, NOTE_ROUNDNESS};

const KEYBOARD_HEIGHT: f32 = 120.0;
/// Share of the keyboard height covered by black keys.
const BLACK_KEY_DEPTH: f32 = 0.6;
const TOUCH_VELOCITY: f32 = 0.7;
const BACKGROUND: Color32 = Color32::from_rgb(0x1e, 0x1e, 0x24);

fn color32(rgb: Rgb) -> Color32 {
    Color32::from_rgb(rgb.0, rgb.1, rgb.2)
}

/// The room window: controls on top, saved takes on the right, falling notes
/// over a playable keyboard in the middle.
pub struct PianoApp {
    state: Arc<AppState>,
    layout: WaterfallLayout,
    keys: ComputerKeys,
    /// Key held down with the mouse
    mouse_pitch: Option<u8>,
    recordings: Vec<RecordingSummary>,
    had_focus: bool,
    #[cfg(feature = "midi-io")]
    midi_ports: MidiPorts,
}

impl PianoApp {
    pub fn new(state: Arc<AppState>, layout: WaterfallLayout) -> Self {
        let recordings = state.recordings();
        Self {
            state,
            layout,
            keys: ComputerKeys::default(),
            mouse_pitch: None,
            recordings,
            had_focus: true,
            #[cfg(feature = "midi-io")]
            midi_ports: scan_ports(),
        }
    }

    fn header(&mut self, ui: &mut Ui) {
        let now = Instant::now();
        let (name, user, connected, recording, status, transposition) = self.state.with_room(|room| {
            (
                room.name().to_string(),
                room.user().to_string(),
                room.is_connected(),
                room.is_recording(),
                room.status_message(now),
                room.transposition(),
            )
        });

        ui.horizontal(|ui| {
            ui.heading(&name);
            ui.label(format!("as {}", user));
            if connected {
                ui.colored_label(Color32::LIGHT_GREEN, "connected");
            } else {
                ui.colored_label(Color32::GRAY, "offline");
            }
            ui.separator();
            ui.monospace(status);
        });

        ui.horizontal(|ui| {
            if recording {
                if ui.button("Stop recording").clicked() && self.state.stop_recording().is_some() {
                    self.recordings = self.state.recordings();
                }
            } else if ui.button("Record").clicked() {
                self.state.start_recording();
            }

            if self.state.is_playing() {
                if ui.button("Stop playback").clicked() {
                    self.state.stop_playback();
                }
            } else {
                let last = self.state.last_track();
                if ui.add_enabled(last.is_some(), egui::Button::new("Play last")).clicked() {
                    if let Some(track) = last {
                        self.state.play_track(track);
                    }
                }
            }

            let mut looping = self.state.is_looping();
            if ui.checkbox(&mut looping, "Loop").changed() {
                self.state.toggle_looping();
            }

            ui.separator();
            let mut octaves = transposition;
            if ui
                .add(Slider::new(&mut octaves, -MAX_TRANSPOSITION..=MAX_TRANSPOSITION).text("Transpose"))
                .changed()
            {
                self.state.with_room(|room| room.set_transposition(octaves));
            }

            let mut volume = self.state.volume();
            if ui.add(Slider::new(&mut volume, 0.0..=1.0).text("Volume")).changed() {
                self.state.set_volume(volume);
            }

            ui.label(format!("Keys from {}", note::note_name(self.keys.base())));
        });
    }

    /// MIDI port pickers. Changing either re-points the running listener.
    #[cfg(feature = "midi-io")]
    fn settings(&mut self, ui: &mut Ui) {
        let before = self.state.midi_selection();
        let mut selection = before.clone();

        egui::ComboBox::from_label("MIDI input")
            .selected_text(selection.input.label().to_string())
            .show_ui(ui, |ui| {
                ui.selectable_value(&mut selection.input, InputChoice::FirstAvailable, "First available");
                for name in &self.midi_ports.inputs {
                    ui.selectable_value(&mut selection.input, InputChoice::Named(name.clone()), name);
                }
                ui.selectable_value(&mut selection.input, InputChoice::Off, "None");
            });

        egui::ComboBox::from_label("MIDI thru")
            .selected_text(selection.output.clone().unwrap_or_else(|| "None".to_string()))
            .show_ui(ui, |ui| {
                for name in &self.midi_ports.outputs {
                    ui.selectable_value(&mut selection.output, Some(name.clone()), name);
                }
                ui.selectable_value(&mut selection.output, None, "None");
            });

        if ui.button("Rescan devices").clicked() {
            self.midi_ports = scan_ports();
        }
        if selection != before {
            self.state.set_midi_selection(selection);
        }
    }

    #[cfg(not(feature = "midi-io"))]
    fn settings(&mut self, ui: &mut Ui) {
        ui.label("Built without MIDI support");
    }

    fn recordings_panel(&mut self, ui: &mut Ui) {
        egui::CollapsingHeader::new("Settings").show(ui, |ui| self.settings(ui));
        ui.separator();

        ui.horizontal(|ui| {
            ui.heading("Recordings");
            if ui.small_button("⟳").clicked() {
                self.recordings = self.state.recordings();
            }
        });
        ui.separator();

        if self.recordings.is_empty() {
            ui.label("Nothing recorded yet");
            return;
        }

        let mut chosen = None;
        ScrollArea::vertical().show(ui, |ui| {
            for summary in &self.recordings {
                let label = format!(
                    "{}\n{}  {}",
                    summary.name,
                    summary.recorded_on(),
                    format_time(summary.duration_ms)
                );
                if ui.selectable_label(false, label).on_hover_text("Click to play").clicked() {
                    chosen = Some(summary.clone());
                }
            }
        });

        if let Some(summary) = chosen {
            if let Some(track) = self.state.load_recording(&summary) {
                self.state.play_track(track);
            }
        }
    }

    fn stage(&mut self, ui: &mut Ui) {
        let now = Instant::now();
        let size = vec2(self.layout.width(), self.layout.height + KEYBOARD_HEIGHT);
        let (response, painter) = ui.allocate_painter(size, Sense::click_and_drag());
        let origin = response.rect.min;

        let target = if response.is_pointer_button_down_on() {
            response
                .interact_pointer_pos()
                .and_then(|pos| self.key_under(pos - origin.to_vec2()))
        } else {
            None
        };
        // Sliding across keys plays a glissando
        if target != self.mouse_pitch {
            self.state.with_room(|room| {
                if let Some(pitch) = self.mouse_pitch {
                    room.stop_note(InputSource::Mouse, pitch, now);
                }
                if let Some(pitch) = target {
                    room.play_note(InputSource::Mouse, pitch, TOUCH_VELOCITY, now);
                }
            });
            self.mouse_pitch = target;
        }

        let layout = self.layout;
        let (rects, active) = self.state.with_room(|room| {
            let gone: Vec<_> = room
                .board()
                .drawn()
                .filter(|n| layout.is_offscreen(n, now))
                .map(|n| n.id)
                .collect();
            for id in gone {
                room.board_mut().remove_drawn(id);
            }
            // Notes outside the shown range never scroll off
            room.board_mut().sweep(now, layout.lifetime());

            let rects: Vec<_> = room
                .board()
                .drawn()
                .filter_map(|n| layout.rect(n, now).map(|r| (r, n.color)))
                .collect();
            let colors: Vec<(u8, Rgb)> = room
                .board()
                .drawn()
                .filter(|n| n.ended.is_none())
                .map(|n| (n.pitch, n.color))
                .collect();
            let active: Vec<(u8, Rgb)> = room
                .board()
                .active_pitches()
                .into_iter()
                .map(|pitch| {
                    let color = colors.iter().rev().find(|(p, _)| *p == pitch).map_or(Rgb::LOCAL_NATURAL, |(_, c)| *c);
                    (pitch, color)
                })
                .collect();
            (rects, active)
        });

        let waterfall = Rect::from_min_size(origin, vec2(size.x, layout.height));
        painter.rect_filled(waterfall, 0.0, BACKGROUND);
        let clipped = painter.with_clip_rect(waterfall);
        for (r, color) in rects {
            let rect = Rect::from_min_size(origin + vec2(r.x, r.y), vec2(r.width, r.height));
            clipped.rect_filled(rect, NOTE_ROUNDNESS, color32(color));
        }

        self.draw_keyboard(&painter, origin + vec2(0.0, layout.height), &active);
    }

    /// Pitch under a point relative to the stage origin.
    fn key_under(&self, at: Pos2) -> Option<u8> {
        let depth = at.y - self.layout.height;
        if !(0.0..KEYBOARD_HEIGHT).contains(&depth) {
            return None;
        }
        self.layout.pitch_at(at.x, depth < KEYBOARD_HEIGHT * BLACK_KEY_DEPTH)
    }

    fn draw_keyboard(&self, painter: &Painter, top_left: Pos2, active: &[(u8, Rgb)]) {
        let highlight = |pitch: u8| active.iter().find(|(p, _)| *p == pitch).map(|(_, c)| color32(*c));
        let outline = Stroke::new(1.0, Color32::DARK_GRAY);
        let layout = &self.layout;

        for pitch in (layout.low..=layout.high).filter(|p| !note::is_black(*p)) {
            let (x, width) = layout.lane(pitch);
            let rect = Rect::from_min_size(top_left + vec2(x, 0.0), vec2(width, KEYBOARD_HEIGHT));
            painter.rect_filled(rect, 2.0, highlight(pitch).unwrap_or(Color32::WHITE));
            painter.rect_stroke(rect, 2.0, outline);
        }
        for pitch in (layout.low..=layout.high).filter(|p| note::is_black(*p)) {
            let (x, width) = layout.lane(pitch);
            let rect = Rect::from_min_size(
                top_left + vec2(x, 0.0),
                vec2(width, KEYBOARD_HEIGHT * BLACK_KEY_DEPTH),
            );
            painter.rect_filled(rect, 2.0, highlight(pitch).unwrap_or(Color32::BLACK));
        }

        // Mark middle C
        if layout.contains(60) {
            let (x, width) = layout.lane(60);
            let dot = pos2(top_left.x + x + width / 2.0, top_left.y + KEYBOARD_HEIGHT - 10.0);
            painter.circle_filled(dot, 3.0, color32(NoteColors::for_player(&Player::Local).natural));
        }
    }

    fn computer_keys(&mut self, ctx: &Context) {
        let (events, focused) = ctx.input(|i| (i.events.clone(), i.focused));
        let now = Instant::now();

        if !focused && self.had_focus {
            // Key-up events never arrive once the window loses focus
            let released = self.keys.release_all();
            self.state.with_room(|room| {
                for pitch in released {
                    room.stop_note(InputSource::Keyboard, pitch, now);
                }
            });
        }
        self.had_focus = focused;
        if ctx.wants_keyboard_input() {
            return;
        }

        for event in events {
            let Event::Key {
                key, pressed, repeat, ..
            } = event
            else {
                continue;
            };
            if repeat {
                continue;
            }
            let action = if pressed {
                self.keys.key_down(key.name())
            } else {
                self.keys.key_up(key.name())
            };
            match action {
                KeyAction::Press(pitch) => self
                    .state
                    .with_room(|room| room.play_note(InputSource::Keyboard, pitch, TOUCH_VELOCITY, now)),
                KeyAction::Release(pitch) => self
                    .state
                    .with_room(|room| room.stop_note(InputSource::Keyboard, pitch, now)),
                KeyAction::Octave(_) | KeyAction::None => {}
            }
        }
    }
}

impl App for PianoApp {
    fn update(&mut self, ctx: &Context, _: &mut eframe::Frame) {
        // Notes keep falling between input events
        ctx.request_repaint();
        self.computer_keys(ctx);

        TopBottomPanel::top("header").show(ctx, |ui| self.header(ui));
        SidePanel::right("sidebar")
            .default_width(220.0)
            .show(ctx, |ui| self.recordings_panel(ui));
        CentralPanel::default().show(ctx, |ui| {
            ScrollArea::horizontal().show(ui, |ui| self.stage(ui));
        });
    }
}

#[cfg(feature = "midi-io")]
fn scan_ports() -> MidiPorts {
    midi::list_ports().unwrap_or_else(|e| {
        warn!("Could not list MIDI ports: {}", e);
        MidiPorts::default()
    })
}

/// Initializes and runs the eframe application.
pub fn run_ui(state: Arc<AppState>, layout: WaterfallLayout) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1280.0, 720.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Piano Room",
        options,
        Box::new(|_cc: &CreationContext| Ok(Box::new(PianoApp::new(state, layout)))),
    )
}
