//! WebSocket link between the local room and the room server.
//!
//! The link runs on a blocking thread: a reader thread applies incoming
//! events to the room while the calling thread drains the room's outbox.
//! When the socket drops, peers are released and the link reconnects after
//! [`RETRY_DELAY`]. Connection problems never stop local play.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use websocket::sync::Client;
use websocket::{ClientBuilder, OwnedMessage};

use crate::protocol::RoomEvent;
use crate::state::AppState;

pub const RETRY_DELAY: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid server address {url}: {reason}")]
    Address { url: String, reason: String },
    #[error("could not reach {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("socket error: {0}")]
    Socket(String),
}

/// Why a connected session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    /// The room dropped its outbox; nothing left to send, ever.
    OutboxClosed,
    Shutdown,
}

fn connect(url: &str) -> Result<Client<TcpStream>, LinkError> {
    let mut builder = ClientBuilder::new(url).map_err(|e| LinkError::Address {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    builder.connect_insecure().map_err(|e| LinkError::Connect {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Applies one text frame from the server to the room.
fn apply_frame(state: &AppState, text: &str) {
    match RoomEvent::decode(text) {
        Ok(event) => state.with_room(|room| room.handle_remote(event, Instant::now())),
        Err(e) => debug!("Ignoring frame {:?}: {}", text, e),
    }
}

/// Drops events queued while no session was up; returns how many.
fn discard_pending(outbox: &Receiver<RoomEvent>) -> usize {
    outbox.try_iter().count()
}

fn run_session(state: &Arc<AppState>, client: Client<TcpStream>, outbox: &Receiver<RoomEvent>) -> Result<SessionEnd, LinkError> {
    let (mut reader, mut writer) = client.split().map_err(|e| LinkError::Socket(e.to_string()))?;

    // Notes played while connecting were never heard by the room
    let stale = discard_pending(outbox);
    if stale > 0 {
        debug!("Discarded {} events queued while offline", stale);
    }
    let join = state.with_room(|room| room.join_event());
    let text = join.encode().map_err(|e| LinkError::Socket(e.to_string()))?;
    writer
        .send_message(&OwnedMessage::Text(text))
        .map_err(|e| LinkError::Socket(e.to_string()))?;
    state.with_room(|room| room.set_connected(true, Instant::now()));

    let alive = Arc::new(AtomicBool::new(true));
    let reader_thread = {
        let state = state.clone();
        let alive = alive.clone();
        thread::spawn(move || {
            for message in reader.incoming_messages() {
                match message {
                    Ok(OwnedMessage::Text(text)) => apply_frame(&state, &text),
                    Ok(OwnedMessage::Close(_)) => {
                        info!("Server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Connection lost: {}", e);
                        break;
                    }
                }
            }
            alive.store(false, Ordering::Relaxed);
        })
    };

    let end = loop {
        match outbox.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Could not encode {:?}: {}", event, e);
                        continue;
                    }
                };
                if let Err(e) = writer.send_message(&OwnedMessage::Text(text)) {
                    warn!("Send failed: {}", e);
                    break SessionEnd::Disconnected;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if state.is_shutting_down() {
                    break SessionEnd::Shutdown;
                }
                if !alive.load(Ordering::Relaxed) {
                    break SessionEnd::Disconnected;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break SessionEnd::OutboxClosed,
        }
    };

    if end == SessionEnd::Shutdown {
        let _ = writer.send_message(&OwnedMessage::Close(None));
    }
    // Unblocks the reader
    if let Err(e) = writer.shutdown_all() {
        debug!("Socket shutdown: {}", e);
    }
    if reader_thread.join().is_err() {
        error!("Socket reader thread panicked");
    }
    state.with_room(|room| room.set_connected(false, Instant::now()));
    Ok(end)
}

/// Keeps the room connected to `url` until shutdown.
pub async fn run_room_link(state: Arc<AppState>, url: String, outbox: Receiver<RoomEvent>) {
    let result = tokio::task::spawn_blocking(move || {
        while !state.is_shutting_down() {
            info!("Connecting to room server at {}", url);
            match connect(&url).and_then(|client| run_session(&state, client, &outbox)) {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::OutboxClosed) => {
                    info!("Room closed its outbox, stopping the link");
                    break;
                }
                Ok(SessionEnd::Disconnected) => warn!("Disconnected from {}", url),
                Err(e) => warn!("{}", e),
            }

            info!("Retrying in {} s", RETRY_DELAY.as_secs());
            let resume = Instant::now() + RETRY_DELAY;
            while Instant::now() < resume && !state.is_shutting_down() {
                discard_pending(&outbox);
                thread::sleep(POLL_INTERVAL);
            }
        }
        debug!("Room link stopped");
    })
    .await;

    if let Err(e) = result {
        error!("Room link task failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Synth, VoiceBank};
    use crate::room::Room;
    use std::sync::Mutex;

    fn state() -> Arc<AppState> {
        let voices = Arc::new(Mutex::new(VoiceBank::new(0.5)));
        let room = Room::new("BellaRoom", "ada", Box::new(Synth::new(voices.clone())));
        AppState::new(room, voices, None)
    }

    #[test]
    fn frames_reach_the_room() {
        let state = state();
        apply_frame(&state, r#"{"event":"note_on","data":{"pitch":60,"velocity":0.5,"player":"bella"}}"#);
        assert!(state.with_room(|room| room.board().is_sounding(60)));

        apply_frame(&state, "not json");
        apply_frame(&state, r#"{"event":"note_off","data":{"pitch":60,"player":"bella"}}"#);
        assert!(!state.with_room(|room| room.board().is_sounding(60)));
    }

    #[test]
    fn offline_events_are_discarded() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(RoomEvent::note_on(60, 0.5)).unwrap();
        tx.send(RoomEvent::note_off(60)).unwrap();
        assert_eq!(discard_pending(&rx), 2);
        assert_eq!(discard_pending(&rx), 0);

        tx.send(RoomEvent::Pong).unwrap();
        assert_eq!(rx.try_recv().unwrap(), RoomEvent::Pong);
    }

    #[test]
    fn bad_addresses_are_reported() {
        match connect("not a url") {
            Err(LinkError::Address { url, .. }) => assert_eq!(url, "not a url"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to nowhere"),
        }
    }
}
