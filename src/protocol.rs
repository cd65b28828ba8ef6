use serde::{Deserialize, Serialize};

/// Messages exchanged with the room server, encoded as
/// `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RoomEvent {
    NoteOn {
        pitch: u8,
        velocity: f32,
        /// Filled in by the server when relaying a peer's note
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<String>,
    },
    NoteOff {
        pitch: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<String>,
    },
    Join {
        room: String,
        user: String,
    },
    Leave {
        #[serde(default)]
        player: Option<String>,
    },
    Ping,
    Pong,
}

impl RoomEvent {
    pub fn note_on(pitch: u8, velocity: f32) -> Self {
        RoomEvent::NoteOn {
            pitch,
            velocity,
            player: None,
        }
    }

    pub fn note_off(pitch: u8) -> Self {
        RoomEvent::NoteOff { pitch, player: None }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_note_on_has_no_player() {
        let json = RoomEvent::note_on(60, 0.5).encode().unwrap();
        assert_eq!(json, r#"{"event":"note_on","data":{"pitch":60,"velocity":0.5}}"#);
    }

    #[test]
    fn relayed_notes_carry_the_sender() {
        let event = RoomEvent::decode(r#"{"event":"note_off","data":{"pitch":61,"player":"bella"}}"#).unwrap();
        assert_eq!(
            event,
            RoomEvent::NoteOff {
                pitch: 61,
                player: Some("bella".into())
            }
        );

        let anonymous = RoomEvent::decode(r#"{"event":"note_on","data":{"pitch":61,"velocity":1.0}}"#).unwrap();
        assert_eq!(anonymous, RoomEvent::note_on(61, 1.0));
    }

    #[test]
    fn keepalive_has_no_payload() {
        assert_eq!(RoomEvent::Pong.encode().unwrap(), r#"{"event":"pong"}"#);
        assert_eq!(RoomEvent::decode(r#"{"event":"ping"}"#).unwrap(), RoomEvent::Ping);
    }

    #[test]
    fn unknown_events_are_errors() {
        assert!(RoomEvent::decode(r#"{"event":"chat","data":{"text":"hi"}}"#).is_err());
    }
}
