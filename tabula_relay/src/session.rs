// Session state for one two-player game pairing.
//
// `Session` tracks the two player slots, whose turn it is, and the board
// state reported by the last accepted action. All mutation happens on the
// server's coordinator thread, so there is no locking here.
//
// Methods that notify players take the `ConnectionTable`, which pins the
// message order on each socket right next to the state change it reports.
// The one cross-connection guarantee the protocol makes is enforced in
// `submit_action`: an accepted action reaches the opponent before the
// `your_turn` that frees them to answer it.
//
// Write failures on the game path surface as `SessionError::SendFailed`
// carrying the failed connection so the server can tear it down. Chat
// writes are advisory and only logged.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use tabula_protocol::{GameKind, GameSummary, Message, PlayerNumber, ProtocolError};

use crate::connection::{ConnectionId, ConnectionTable};

/// Hard cap on players per session: one board, two sides.
pub const PLAYERS_PER_GAME: u8 = 2;

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, no slot filled yet.
    Empty,
    /// One slot filled, waiting for an opponent.
    Waiting,
    /// Both slots filled, actions flow.
    Active,
    /// A player left. Final: the pairing never resumes.
    Terminated,
}

/// Why a session operation was refused.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("game is full")]
    Full,
    #[error("game is not active")]
    NotActive,
    #[error("connection is not a member of this game")]
    NotMember,
    #[error("not this player's turn")]
    NotYourTurn,
    /// A game-path write failed; the named connection must be torn down.
    #[error("send to connection {conn} failed: {source}")]
    SendFailed {
        conn: ConnectionId,
        source: ProtocolError,
    },
}

struct Slot {
    conn: ConnectionId,
    name: String,
}

/// One board-game pairing: two slots, a turn holder, a relayed board state.
pub struct Session {
    game_id: String,
    kind: GameKind,
    slots: [Option<Slot>; 2],
    turn: PlayerNumber,
    phase: SessionPhase,
    last_board_state: Option<Value>,
    turn_started_at: Option<Instant>,
}

impl Session {
    pub fn new(game_id: impl Into<String>, kind: GameKind) -> Self {
        Self {
            game_id: game_id.into(),
            kind,
            slots: [None, None],
            turn: PlayerNumber::ONE,
            phase: SessionPhase::Empty,
            last_board_state: None,
            turn_started_at: None,
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// A session accepts joiners until both slots are filled.
    pub fn is_joinable(&self) -> bool {
        matches!(self.phase, SessionPhase::Empty | SessionPhase::Waiting)
    }

    pub fn player_count(&self) -> u8 {
        self.slots.iter().flatten().count() as u8
    }

    /// Current turn holder.
    pub fn turn(&self) -> PlayerNumber {
        self.turn
    }

    /// Board state carried by the most recent accepted action, if any.
    pub fn last_board_state(&self) -> Option<&Value> {
        self.last_board_state.as_ref()
    }

    /// Connection seated in `number`'s slot.
    pub fn slot_conn(&self, number: PlayerNumber) -> Option<ConnectionId> {
        self.slot(number).map(|s| s.conn)
    }

    fn slot(&self, number: PlayerNumber) -> Option<&Slot> {
        self.slots[number.index()].as_ref()
    }

    /// Slot number occupied by `conn`, if it is a member.
    fn slot_of(&self, conn: ConnectionId) -> Option<PlayerNumber> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.as_ref().is_some_and(|s| s.conn == conn) {
                return Some(PlayerNumber(i as u8 + 1));
            }
        }
        None
    }

    /// Seat a player in the lowest free slot.
    ///
    /// Fails only when both slots are taken, and a failed add leaves the
    /// session untouched. Filling the second slot activates the session
    /// with slot 1 to move; the caller delivers the assignments and then
    /// follows up with `announce_turn`.
    pub fn add_player(
        &mut self,
        conn: ConnectionId,
        name: impl Into<String>,
    ) -> Result<PlayerNumber, SessionError> {
        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SessionError::Full)?;
        let number = PlayerNumber(free as u8 + 1);
        self.slots[free] = Some(Slot {
            conn,
            name: name.into(),
        });
        if self.player_count() < PLAYERS_PER_GAME {
            self.phase = SessionPhase::Waiting;
        } else {
            self.phase = SessionPhase::Active;
            self.turn = PlayerNumber::ONE;
            self.turn_started_at = Some(Instant::now());
            info!("game '{}' is active, slot 1 to move", self.game_id);
        }
        Ok(number)
    }

    /// Tell both players whose turn it is: `your_turn` to the holder first,
    /// then `wait_turn` to the other slot.
    pub fn announce_turn(&self, conns: &mut ConnectionTable) -> Result<(), SessionError> {
        let holder = self.turn;
        self.send_slot(
            conns,
            holder,
            &Message::YourTurn {
                game_id: self.game_id.clone(),
            },
        )?;
        self.send_slot(
            conns,
            holder.other(),
            &Message::WaitTurn {
                game_id: self.game_id.clone(),
            },
        )?;
        Ok(())
    }

    /// Validate and relay one action from `from`.
    ///
    /// Refused without any state change unless the session is active and
    /// `from` occupies the slot whose turn it is. On acceptance the
    /// opponent receives the action verbatim under this session's id, the
    /// turn flips, and both players are told who moves next. The opponent's
    /// copy of the action is written before their `your_turn`.
    pub fn submit_action(
        &mut self,
        conns: &mut ConnectionTable,
        from: ConnectionId,
        action: &Map<String, Value>,
    ) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Active {
            return Err(SessionError::NotActive);
        }
        let mover = self.slot_of(from).ok_or(SessionError::NotMember)?;
        if mover != self.turn {
            return Err(SessionError::NotYourTurn);
        }

        let forward = Message::GameAction {
            game_id: self.game_id.clone(),
            action: action.clone(),
        };
        self.send_slot(conns, mover.other(), &forward)?;

        if let Some(board) = action.get("board_state") {
            self.last_board_state = Some(board.clone());
        }
        self.turn = mover.other();
        self.turn_started_at = Some(Instant::now());
        debug!(
            "game '{}': slot {} moved, slot {} to play",
            self.game_id, mover, self.turn
        );

        self.announce_turn(conns)
    }

    /// Take `leaving` out of the session and finish it.
    ///
    /// Final: the session never leaves `Terminated`. Both members lose
    /// their game binding in the table, and the surviving player, if any,
    /// then gets one `player_disconnected` naming who left and why.
    /// Removing a connection that is not a member does nothing.
    pub fn remove_player(
        &mut self,
        conns: &mut ConnectionTable,
        leaving: ConnectionId,
        reason: &str,
    ) -> Result<(), SessionError> {
        let Some(number) = self.slot_of(leaving) else {
            return Ok(());
        };
        let slot = self.slots[number.index()].take();
        self.phase = SessionPhase::Terminated;
        self.turn_started_at = None;
        let name = slot.map(|s| s.name).unwrap_or_default();
        info!(
            "game '{}': player {} ({}) removed: {}",
            self.game_id, number, name, reason
        );
        // Session names can be reused, so neither member's table binding
        // may outlive the session. A stale binding would aim its owner's
        // own teardown at whichever session holds the name next.
        conns.clear_game(leaving);
        if let Some(survivor) = self.slot_conn(number.other()) {
            conns.clear_game(survivor);
        }
        self.send_slot(
            conns,
            number.other(),
            &Message::PlayerDisconnected {
                message: format!("{name} {reason}"),
                game_id: self.game_id.clone(),
            },
        )
    }

    /// Forward a chat line to every other member. Chat is advisory: write
    /// failures are logged and swallowed, never fatal to the session, and
    /// the sender never gets their own line back.
    pub fn relay_chat(
        &self,
        conns: &mut ConnectionTable,
        from: ConnectionId,
        sender_name: &str,
        text: &str,
        player_number: PlayerNumber,
    ) -> Result<(), SessionError> {
        if self.slot_of(from).is_none() {
            return Err(SessionError::NotMember);
        }
        let relayed = Message::ChatReceive {
            sender_name: sender_name.to_string(),
            message: text.to_string(),
            player_number,
            game_id: self.game_id.clone(),
        };
        for slot in self.slots.iter().flatten() {
            if slot.conn == from {
                continue;
            }
            if let Err(e) = conns.send(slot.conn, &relayed) {
                debug!(
                    "game '{}': dropping chat line to {}: {}",
                    self.game_id, slot.conn, e
                );
            }
        }
        Ok(())
    }

    /// When a turn timeout is configured: the connection to forfeit, if the
    /// current turn has outlived `limit`.
    pub fn turn_expired(&self, limit: Duration) -> Option<ConnectionId> {
        if self.phase != SessionPhase::Active {
            return None;
        }
        let started = self.turn_started_at?;
        if started.elapsed() < limit {
            return None;
        }
        self.slot_conn(self.turn)
    }

    /// Entry for a `game_list` reply.
    pub fn summary(&self) -> GameSummary {
        GameSummary {
            game_id: self.game_id.clone(),
            game_type: self.kind,
            player_count: self.player_count(),
            max_players: PLAYERS_PER_GAME,
        }
    }

    /// Framed send to one slot, mapping failure to the slot's connection.
    /// An empty slot is skipped.
    fn send_slot(
        &self,
        conns: &mut ConnectionTable,
        number: PlayerNumber,
        msg: &Message,
    ) -> Result<(), SessionError> {
        let Some(slot) = self.slot(number) else {
            return Ok(());
        };
        conns
            .send(slot.conn, msg)
            .map_err(|source| SessionError::SendFailed {
                conn: slot.conn,
                source,
            })
    }
}
