use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::note::{self, PIANO_HIGH, PIANO_LOW};

/// Play the piano together with the people in a room.
#[derive(Debug, Parser)]
#[command(name = "piano_room", version, about)]
pub struct Cli {
    /// Default log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub play: PlayArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Join a room and play (the default)
    Play,
    /// List MIDI input and output ports
    Devices,
    /// List saved recordings
    Recordings,
    /// Join a room and play a random track into it
    Demo {
        /// Number of notes to generate
        #[arg(long, default_value_t = 50)]
        notes: usize,
        /// Seed for a repeatable demo
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct PlayArgs {
    /// Room server, e.g. ws://localhost:8080/ws; play offline when unset
    #[arg(long, env = "PIANO_ROOM_SERVER")]
    pub server: Option<String>,

    #[arg(long, default_value = "BellaRoom")]
    pub room: String,

    /// Name shown to the other players
    #[arg(long, default_value = "guest")]
    pub user: String,

    /// MIDI input port name (substring match); first port when unset
    #[arg(long)]
    pub midi_in: Option<String>,

    /// MIDI output port that receives everything played on the input
    #[arg(long)]
    pub midi_out: Option<String>,

    /// Do not open MIDI ports
    #[arg(long)]
    pub no_midi: bool,

    /// Octaves to shift MIDI input by
    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_parser = clap::value_parser!(i8).range(-3..=3))]
    pub transpose: i8,

    #[arg(long, default_value_t = 0.5)]
    pub volume: f32,

    /// Directory holding saved recordings
    #[arg(long, default_value = "recordings")]
    pub recordings: PathBuf,

    /// Record notes from the other players too
    #[arg(long)]
    pub record_remote: bool,

    /// Run without a window until Ctrl-C
    #[arg(long)]
    pub headless: bool,

    /// Lowest key shown, as a note name (A0) or MIDI number
    #[arg(long, default_value = "A0", value_parser = parse_pitch)]
    pub low: u8,

    /// Highest key shown
    #[arg(long, default_value = "C8", value_parser = parse_pitch)]
    pub high: u8,
}

impl PlayArgs {
    /// Shown key range, widened to the full piano when `low` is above `high`.
    pub fn key_range(&self) -> (u8, u8) {
        if self.low <= self.high {
            (self.low, self.high)
        } else {
            (PIANO_LOW, PIANO_HIGH)
        }
    }
}

fn parse_pitch(text: &str) -> Result<u8, String> {
    note::parse_note(text).ok_or_else(|| format!("`{}` is not a note like C4 or a MIDI number", text))
}
