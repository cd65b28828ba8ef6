//! Replays a recorded [`Track`] with its original timing.
//!
//! Event `i` of a pass fires at `pass start + time_i`, so rounding in one
//! sleep never accumulates across the track. A pass lasts the track's
//! duration; looping is checked at the end of every pass and may be toggled
//! while the track plays. Whatever a pass leaves held is released at the end
//! of the pass and on stop.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::recording::{EventKind, Track, TrackEvent};

/// A track event with the delay since the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    pub delay: Duration,
    pub event: TrackEvent,
}

pub fn schedule(track: &Track) -> Vec<ScheduledEvent> {
    let mut events = track.events.clone();
    events.sort_by_key(|e| e.time_ms);

    let mut previous = 0;
    events
        .into_iter()
        .map(|event| {
            let delay = Duration::from_millis(event.time_ms - previous);
            previous = event.time_ms;
            ScheduledEvent { delay, event }
        })
        .collect()
}

/// Length of one pass: the recorded duration, stretched to cover the last event.
pub fn pass_length(track: &Track) -> Duration {
    let last = track.events.iter().map(|e| e.time_ms).max().unwrap_or(0);
    Duration::from_millis(track.duration_ms.max(last))
}

pub struct PlaybackHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PlaybackHandle {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the playback task to wind down.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            debug!("Playback task ended abnormally: {}", e);
        }
    }
}

/// Starts replaying `track` on the current tokio runtime, feeding every event
/// to `sink`.
pub fn spawn_playback<F>(track: Track, looping: Arc<AtomicBool>, sink: F) -> PlaybackHandle
where
    F: FnMut(&TrackEvent) + Send + 'static,
{
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run_playback(track, looping, stop_rx, sink));
    PlaybackHandle { stop, task }
}

async fn run_playback<F>(track: Track, looping: Arc<AtomicBool>, mut stop_rx: watch::Receiver<bool>, mut sink: F)
where
    F: FnMut(&TrackEvent),
{
    let events = schedule(&track);
    if events.is_empty() {
        debug!("Nothing to play in {}", track.name);
        return;
    }
    let length = pass_length(&track);
    info!("Playing {} ({} events, {} ms)", track.name, events.len(), length.as_millis());

    let mut pass = 0u32;
    loop {
        pass += 1;
        let start = Instant::now();
        let mut held = BTreeSet::new();
        let mut offset = Duration::ZERO;

        for scheduled in &events {
            offset += scheduled.delay;
            if !wait_until(start + offset, &mut stop_rx).await {
                release_held(&mut held, start, &mut sink);
                debug!("Playback of {} stopped in pass {}", track.name, pass);
                return;
            }
            let event = scheduled.event;
            match event.kind {
                EventKind::NoteOn => held.insert(event.pitch),
                EventKind::NoteOff => held.remove(&event.pitch),
            };
            sink(&event);
        }

        let completed = wait_until(start + length, &mut stop_rx).await;
        release_held(&mut held, start, &mut sink);
        if !completed {
            debug!("Playback of {} stopped at the end of pass {}", track.name, pass);
            return;
        }
        if !looping.load(Ordering::Relaxed) || length.is_zero() {
            info!("Finished playing {}", track.name);
            return;
        }
    }
}

/// Sleeps until `deadline`; false when a stop was requested first.
async fn wait_until(deadline: Instant, stop_rx: &mut watch::Receiver<bool>) -> bool {
    let stopped = *stop_rx.borrow();
    if stopped {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        // A dropped handle counts as a stop
        _ = stop_rx.changed() => false,
    }
}

fn release_held<F>(held: &mut BTreeSet<u8>, start: Instant, sink: &mut F)
where
    F: FnMut(&TrackEvent),
{
    let time_ms = start.elapsed().as_millis() as u64;
    for pitch in std::mem::take(held) {
        sink(&TrackEvent {
            kind: EventKind::NoteOff,
            pitch,
            velocity: 0.0,
            time_ms,
        });
    }
}
