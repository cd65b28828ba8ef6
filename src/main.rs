use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod audio;
mod board;
mod color;
mod config;
mod demo;
mod keymap;
mod library;
mod link;
mod midi;
mod note;
mod playback;
mod protocol;
mod recording;
mod room;
mod state;
#[cfg(feature = "gui")]
mod ui;
mod waterfall;

use crate::audio::{Synth, VoiceBank};
use crate::config::{Cli, Command, PlayArgs};
use crate::library::RecordingLibrary;
use crate::midi::MidiSelection;
use crate::recording::format_time;
use crate::room::Room;
use crate::state::AppState;
use crate::waterfall::WaterfallLayout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Command::Devices) => list_devices(),
        Some(Command::Recordings) => list_recordings(&cli.play),
        Some(Command::Demo { notes, seed }) => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let track = demo::random_track(notes, &mut rng);
            play(cli.play, Some(track)).await
        }
        Some(Command::Play) | None => play(cli.play, None).await,
    }
}

#[cfg(feature = "midi-io")]
fn list_devices() -> anyhow::Result<()> {
    let ports = midi::list_ports()?;
    println!("MIDI inputs:");
    for name in &ports.inputs {
        println!("  {}", name);
    }
    println!("MIDI outputs:");
    for name in &ports.outputs {
        println!("  {}", name);
    }
    Ok(())
}

#[cfg(not(feature = "midi-io"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("built without MIDI support")
}

fn list_recordings(args: &PlayArgs) -> anyhow::Result<()> {
    let library = RecordingLibrary::open(&args.recordings)?;
    let recordings = library.list()?;
    if recordings.is_empty() {
        println!("No recordings in {}", library.dir().display());
    }
    for summary in recordings {
        println!(
            "{}  {}  {}  {}",
            summary.recorded_on(),
            format_time(summary.duration_ms),
            summary.name,
            summary.path.display()
        );
    }
    Ok(())
}

async fn play(args: PlayArgs, demo_track: Option<recording::Track>) -> anyhow::Result<()> {
    let voices = Arc::new(Mutex::new(VoiceBank::new(args.volume)));
    let mut room = Room::new(&args.room, &args.user, Box::new(Synth::new(voices.clone())));
    room.set_transposition(args.transpose);
    room.set_record_remote(args.record_remote);

    let outbox = args.server.as_ref().map(|_| {
        let (tx, rx) = mpsc::channel();
        room.attach_outbox(tx);
        rx
    });

    let library = match RecordingLibrary::open(&args.recordings) {
        Ok(library) => Some(library),
        Err(e) => {
            warn!("Recordings will not be saved: {}", e);
            None
        }
    };

    let state = AppState::new(room, voices, library);
    info!("Joining {} as {}", args.room, args.user);

    #[cfg(feature = "audio")]
    tokio::spawn(audio::run_audio_synthesizer(state.clone()));

    state.set_midi_selection(MidiSelection::new(
        args.midi_in.clone(),
        args.midi_out.clone(),
        args.no_midi,
    ));
    #[cfg(feature = "midi-io")]
    tokio::spawn(midi::run_midi_listener(state.clone()));

    let link = match (args.server.clone(), outbox) {
        (Some(url), Some(outbox)) => Some(tokio::spawn(link::run_room_link(state.clone(), url, outbox))),
        _ => {
            info!("No room server configured, playing offline");
            None
        }
    };

    if let Some(track) = demo_track {
        state.play_track(track);
    }

    let (low, high) = args.key_range();
    let layout = WaterfallLayout {
        low,
        high,
        ..WaterfallLayout::default()
    };
    run_front_end(&state, layout, args.headless).await?;

    info!("Shutting down");
    state.shutdown();
    if let Some(link) = link {
        if let Err(e) = link.await {
            warn!("Room link ended abnormally: {}", e);
        }
    }
    Ok(())
}

#[cfg(feature = "gui")]
async fn run_front_end(state: &Arc<AppState>, layout: WaterfallLayout, headless: bool) -> anyhow::Result<()> {
    if headless {
        return run_headless(state, layout).await;
    }
    let state = state.clone();
    // The window owns this thread until it closes
    tokio::task::block_in_place(move || ui::run_ui(state, layout)).map_err(|e| anyhow::anyhow!("UI failed: {}", e))
}

#[cfg(not(feature = "gui"))]
async fn run_front_end(state: &Arc<AppState>, layout: WaterfallLayout, _headless: bool) -> anyhow::Result<()> {
    run_headless(state, layout).await
}

/// Plays without a window until Ctrl-C. Ended notes are still swept so the
/// board does not grow without bound.
async fn run_headless(state: &Arc<AppState>, layout: WaterfallLayout) -> anyhow::Result<()> {
    info!("Running headless, press Ctrl-C to leave");
    let mut sweep = tokio::time::interval(layout.lifetime());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => return result.context("could not listen for Ctrl-C"),
            _ = sweep.tick() => {
                let swept = state.with_room(|room| room.board_mut().sweep(std::time::Instant::now(), layout.lifetime()));
                if swept > 0 {
                    debug!("Swept {} finished notes", swept);
                }
            }
        }
    }
}
