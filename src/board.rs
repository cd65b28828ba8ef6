//! Active and drawn note bookkeeping for every player in the room.
//!
//! A pitch held by a player may be held by several input sources at once
//! (the mouse and a MIDI controller, say). The note only ends once the last
//! of them lets go, and the instrument is only silenced once no player at
//! all holds the pitch any more.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::color::{NoteColors, Rgb};
use crate::note;

/// Who a note belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Player {
    Local,
    /// A peer in the room. An empty id is an anonymous peer.
    Remote(String),
}

impl Player {
    pub fn remote(id: Option<String>) -> Self {
        Player::Remote(id.unwrap_or_default())
    }
}

/// Where a note event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputSource {
    Mouse,
    Keyboard,
    Midi,
    Playback,
    Socket,
}

impl InputSource {
    /// Sources that belong to the person at this machine.
    pub fn is_performance(self) -> bool {
        matches!(self, InputSource::Mouse | InputSource::Keyboard | InputSource::Midi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawnNoteId(pub u64);

/// Horizontal placement of a note in the waterfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    pub white_index: u8,
    pub black: bool,
}

impl Lane {
    pub fn for_pitch(pitch: u8) -> Self {
        Lane {
            white_index: note::white_keys_before(pitch),
            black: note::is_black(pitch),
        }
    }
}

/// A note span feeding the falling-note view.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnNote {
    pub id: DrawnNoteId,
    pub player: Player,
    pub pitch: u8,
    pub velocity: f32,
    pub color: Rgb,
    pub lane: Lane,
    pub created: Instant,
    pub ended: Option<Instant>,
}

#[derive(Debug, Clone)]
struct ActiveNote {
    holders: BTreeSet<InputSource>,
    drawn: DrawnNoteId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressed {
    /// The pitch was not held by this player.
    Started(DrawnNoteId),
    /// Another source of the same player already holds the pitch.
    Joined,
    /// The same source pressed again; the previous span was closed.
    Retriggered(DrawnNoteId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    NotHeld,
    StillHeld,
    /// The last holder let go. `silenced` is set when no player holds the
    /// pitch any more.
    Ended { drawn: DrawnNoteId, silenced: bool },
}

#[derive(Debug, Default)]
pub struct NoteBoard {
    active: HashMap<(Player, u8), ActiveNote>,
    drawn: BTreeMap<DrawnNoteId, DrawnNote>,
    /// Number of players holding each pitch.
    sounding: HashMap<u8, u32>,
    next_id: u64,
}

impl NoteBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(
        &mut self,
        player: &Player,
        source: InputSource,
        pitch: u8,
        velocity: f32,
        at: Instant,
    ) -> Pressed {
        let key = (player.clone(), pitch);
        match self.active.get(&key).map(|a| (a.holders.contains(&source), a.drawn)) {
            Some((false, _)) => {
                if let Some(active) = self.active.get_mut(&key) {
                    active.holders.insert(source);
                }
                return Pressed::Joined;
            }
            Some((true, previous)) => {
                self.end_drawn(previous, at);
                let id = self.open_drawn(player, pitch, velocity, at);
                if let Some(active) = self.active.get_mut(&key) {
                    active.drawn = id;
                }
                return Pressed::Retriggered(id);
            }
            None => {}
        }

        let id = self.open_drawn(player, pitch, velocity, at);
        self.active.insert(
            key,
            ActiveNote {
                holders: BTreeSet::from([source]),
                drawn: id,
            },
        );
        *self.sounding.entry(pitch).or_insert(0) += 1;
        Pressed::Started(id)
    }

    pub fn release(&mut self, player: &Player, source: InputSource, pitch: u8, at: Instant) -> Released {
        let key = (player.clone(), pitch);
        let Some(active) = self.active.get_mut(&key) else {
            return Released::NotHeld;
        };
        if !active.holders.remove(&source) {
            return Released::NotHeld;
        }
        if !active.holders.is_empty() {
            return Released::StillHeld;
        }

        let drawn = active.drawn;
        self.active.remove(&key);
        self.end_drawn(drawn, at);
        let silenced = match self.sounding.get_mut(&pitch) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            _ => {
                self.sounding.remove(&pitch);
                true
            }
        };
        Released::Ended { drawn, silenced }
    }

    /// Ends every note a player holds, returning the pitches that fell silent.
    pub fn release_player(&mut self, player: &Player, at: Instant) -> Vec<u8> {
        let held: Vec<(u8, Vec<InputSource>)> = self
            .active
            .iter()
            .filter(|((p, _), _)| p == player)
            .map(|((_, pitch), note)| (*pitch, note.holders.iter().copied().collect()))
            .collect();

        let mut silenced = Vec::new();
        for (pitch, sources) in held {
            for source in sources {
                if let Released::Ended { silenced: true, .. } = self.release(player, source, pitch, at) {
                    silenced.push(pitch);
                }
            }
        }
        silenced.sort_unstable();
        silenced
    }

    /// Every remote player with at least one held note.
    pub fn remote_players(&self) -> Vec<Player> {
        let players: BTreeSet<&Player> = self
            .active
            .keys()
            .map(|(player, _)| player)
            .filter(|p| matches!(p, Player::Remote(_)))
            .collect();
        players.into_iter().cloned().collect()
    }

    /// Pitches held by anyone, for highlighting the keyboard.
    pub fn active_pitches(&self) -> BTreeSet<u8> {
        self.sounding.keys().copied().collect()
    }

    pub fn is_sounding(&self, pitch: u8) -> bool {
        self.sounding.contains_key(&pitch)
    }

    pub fn holders(&self, player: &Player, pitch: u8) -> usize {
        self.active
            .get(&(player.clone(), pitch))
            .map_or(0, |note| note.holders.len())
    }

    pub fn drawn(&self) -> impl Iterator<Item = &DrawnNote> {
        self.drawn.values()
    }

    pub fn drawn_note(&self, id: DrawnNoteId) -> Option<&DrawnNote> {
        self.drawn.get(&id)
    }

    pub fn remove_drawn(&mut self, id: DrawnNoteId) -> bool {
        self.drawn.remove(&id).is_some()
    }

    /// Drops finished spans that ended more than `lifetime` before `at`.
    pub fn sweep(&mut self, at: Instant, lifetime: Duration) -> usize {
        let before = self.drawn.len();
        self.drawn.retain(|_, note| match note.ended {
            Some(ended) => at.saturating_duration_since(ended) <= lifetime,
            None => true,
        });
        before - self.drawn.len()
    }

    fn open_drawn(&mut self, player: &Player, pitch: u8, velocity: f32, at: Instant) -> DrawnNoteId {
        let id = DrawnNoteId(self.next_id);
        self.next_id += 1;
        let lane = Lane::for_pitch(pitch);
        self.drawn.insert(
            id,
            DrawnNote {
                id,
                player: player.clone(),
                pitch,
                velocity,
                color: NoteColors::for_player(player).pick(lane.black),
                lane,
                created: at,
                ended: None,
            },
        );
        id
    }

    fn end_drawn(&mut self, id: DrawnNoteId, at: Instant) {
        // The span may already have been swept by the view
        if let Some(note) = self.drawn.get_mut(&id) {
            note.ended = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn press_and_release_single_note() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        let Pressed::Started(id) = board.press(&Player::Local, InputSource::Mouse, 60, 0.5, t0) else {
            panic!("expected a new note");
        };
        assert!(board.is_sounding(60));
        assert_eq!(board.drawn_note(id).unwrap().color, Rgb::LOCAL_NATURAL);

        let released = board.release(&Player::Local, InputSource::Mouse, 60, ms(t0, 250));
        assert_eq!(released, Released::Ended { drawn: id, silenced: true });
        assert!(!board.is_sounding(60));
        assert_eq!(board.drawn_note(id).unwrap().ended, Some(ms(t0, 250)));
    }

    #[test]
    fn two_sources_share_one_note() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        assert!(matches!(
            board.press(&Player::Local, InputSource::Mouse, 64, 0.5, t0),
            Pressed::Started(_)
        ));
        assert_eq!(
            board.press(&Player::Local, InputSource::Midi, 64, 0.8, ms(t0, 10)),
            Pressed::Joined
        );
        assert_eq!(board.holders(&Player::Local, 64), 2);
        assert_eq!(board.drawn().count(), 1);

        assert_eq!(
            board.release(&Player::Local, InputSource::Mouse, 64, ms(t0, 20)),
            Released::StillHeld
        );
        assert!(board.is_sounding(64));
        assert!(matches!(
            board.release(&Player::Local, InputSource::Midi, 64, ms(t0, 30)),
            Released::Ended { silenced: true, .. }
        ));
    }

    #[test]
    fn same_source_retriggers() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        let Pressed::Started(first) = board.press(&Player::Local, InputSource::Midi, 60, 0.5, t0) else {
            panic!("expected a new note");
        };
        let Pressed::Retriggered(second) = board.press(&Player::Local, InputSource::Midi, 60, 0.7, ms(t0, 100))
        else {
            panic!("expected a retrigger");
        };
        assert_ne!(first, second);
        assert_eq!(board.drawn_note(first).unwrap().ended, Some(ms(t0, 100)));
        assert_eq!(board.drawn_note(second).unwrap().ended, None);

        // One release is enough
        assert!(matches!(
            board.release(&Player::Local, InputSource::Midi, 60, ms(t0, 200)),
            Released::Ended { silenced: true, .. }
        ));
    }

    #[test]
    fn pitch_sounds_until_every_player_lets_go() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        let bella = Player::Remote("bella".into());
        board.press(&Player::Local, InputSource::Keyboard, 67, 0.5, t0);
        board.press(&bella, InputSource::Socket, 67, 0.5, t0);
        assert_eq!(board.drawn().count(), 2);

        assert!(matches!(
            board.release(&Player::Local, InputSource::Keyboard, 67, ms(t0, 5)),
            Released::Ended { silenced: false, .. }
        ));
        assert!(board.is_sounding(67));
        assert!(matches!(
            board.release(&bella, InputSource::Socket, 67, ms(t0, 9)),
            Released::Ended { silenced: true, .. }
        ));
        assert!(board.active_pitches().is_empty());
    }

    #[test]
    fn release_of_unknown_note_is_ignored() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        assert_eq!(board.release(&Player::Local, InputSource::Mouse, 60, t0), Released::NotHeld);

        board.press(&Player::Local, InputSource::Mouse, 60, 0.5, t0);
        assert_eq!(board.release(&Player::Local, InputSource::Midi, 60, t0), Released::NotHeld);
        assert_eq!(board.holders(&Player::Local, 60), 1);
    }

    #[test]
    fn simultaneous_notes_get_distinct_ids() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        board.press(&Player::Local, InputSource::Mouse, 60, 0.5, t0);
        board.release(&Player::Local, InputSource::Mouse, 60, t0);
        board.press(&Player::Local, InputSource::Mouse, 60, 0.5, t0);
        let ids: BTreeSet<DrawnNoteId> = board.drawn().map(|n| n.id).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn guest_colors_follow_key_color() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        let guest = Player::remote(None);
        board.press(&guest, InputSource::Socket, 61, 0.5, t0);
        board.press(&guest, InputSource::Socket, 62, 0.5, t0);
        let colors: Vec<Rgb> = board.drawn().map(|n| n.color).collect();
        assert_eq!(colors, vec![Rgb::GUEST_BLACK, Rgb::GUEST_NATURAL]);
        assert!(board.drawn().next().unwrap().lane.black);
    }

    #[test]
    fn release_player_ends_all_their_notes() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        let bella = Player::Remote("bella".into());
        board.press(&bella, InputSource::Socket, 60, 0.5, t0);
        board.press(&bella, InputSource::Socket, 64, 0.5, t0);
        board.press(&Player::Local, InputSource::Mouse, 64, 0.5, t0);
        assert_eq!(board.remote_players(), vec![bella.clone()]);

        let silenced = board.release_player(&bella, ms(t0, 50));
        assert_eq!(silenced, vec![60]);
        assert!(board.is_sounding(64));
        assert!(board.remote_players().is_empty());
        assert!(board.drawn().filter(|n| n.player == bella).all(|n| n.ended.is_some()));
    }

    #[test]
    fn sweep_keeps_held_and_recent_notes() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        board.press(&Player::Local, InputSource::Mouse, 60, 0.5, t0);
        board.release(&Player::Local, InputSource::Mouse, 60, ms(t0, 100));
        board.press(&Player::Local, InputSource::Mouse, 62, 0.5, ms(t0, 200));
        board.release(&Player::Local, InputSource::Mouse, 62, ms(t0, 900));
        board.press(&Player::Local, InputSource::Mouse, 64, 0.5, ms(t0, 950));

        let removed = board.sweep(ms(t0, 1_200), Duration::from_millis(500));
        assert_eq!(removed, 1);
        let left: Vec<u8> = board.drawn().map(|n| n.pitch).collect();
        assert_eq!(left, vec![62, 64]);
    }

    #[test]
    fn removing_drawn_note_keeps_active_note() {
        let t0 = Instant::now();
        let mut board = NoteBoard::new();
        let Pressed::Started(id) = board.press(&Player::Local, InputSource::Mouse, 60, 0.5, t0) else {
            panic!("expected a new note");
        };
        assert!(board.remove_drawn(id));
        assert!(!board.remove_drawn(id));
        assert!(matches!(
            board.release(&Player::Local, InputSource::Mouse, 60, t0),
            Released::Ended { silenced: true, .. }
        ));
    }
}
