// Protocol messages for the session wire format.
//
// One closed enum defines the whole vocabulary, both directions. serde's
// adjacent tagging produces exactly the wire contract: every frame is a JSON
// object with two top-level keys, `type` (the kind, snake_case) and `data`
// (the kind-specific payload).
//
// Game actions are opaque. `game_action` carries the session id plus
// whatever keys the caller's rule-engine chose, captured verbatim in a
// flattened map. The relay stores and forwards that map and never interprets
// it beyond picking out the optional `board_state` member.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::framing::ProtocolError;
use crate::types::{GameKind, PlayerNumber};

/// Every message that can cross the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    /// Join (or create) a named game session.
    Connect {
        player_name: String,
        game_name: String,
        game_type: GameKind,
    },
    /// Join accepted: which slot the player occupies.
    PlayerAssignment {
        player_number: PlayerNumber,
        game_id: String,
        game_type: GameKind,
    },
    /// The recipient holds the turn.
    YourTurn { game_id: String },
    /// The recipient's opponent holds the turn.
    WaitTurn { game_id: String },
    /// A move, relayed verbatim between the two players. The mover includes
    /// a `board_state` object among the flattened keys.
    GameAction {
        game_id: String,
        #[serde(flatten)]
        action: Map<String, Value>,
    },
    /// The opponent is gone; the session is over.
    PlayerDisconnected { message: String, game_id: String },
    /// Deliberate teardown, or a join rejection when sent by the server.
    Disconnect {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        game_id: Option<String>,
    },
    /// Chat line from a player to the rest of the session.
    ChatSend {
        sender_name: String,
        message: String,
        player_number: PlayerNumber,
        game_id: String,
    },
    /// Chat line relayed to every other session member.
    ChatReceive {
        sender_name: String,
        message: String,
        player_number: PlayerNumber,
        game_id: String,
    },
    /// Ask for the joinable sessions.
    GetGameList {},
    /// The joinable sessions.
    GameList { games: Vec<GameSummary> },
}

/// One joinable session, as reported by `game_list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub game_id: String,
    pub game_type: GameKind,
    pub player_count: u8,
    pub max_players: u8,
}

/// Structural check for frames that fail to decode as a [`Message`]: a valid
/// `{type, data}` object with an unrecognized kind is ignorable, anything
/// else is fatal to the connection.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "data")]
    _data: serde::de::IgnoredAny,
}

/// Wire names of every kind in the catalog. Kept in sync with [`Message`]
/// by `catalog_covers_all_kinds` below.
fn is_known_kind(kind: &str) -> bool {
    matches!(
        kind,
        "connect"
            | "player_assignment"
            | "your_turn"
            | "wait_turn"
            | "game_action"
            | "player_disconnected"
            | "disconnect"
            | "chat_send"
            | "chat_receive"
            | "get_game_list"
            | "game_list"
    )
}

/// Decode one frame into a [`Message`].
///
/// A well-formed envelope with an unrecognized `type` comes back as
/// [`ProtocolError::UnknownKind`] so the dispatcher can log and skip it.
/// Everything else that fails to decode, including a known kind with the
/// wrong payload shape, is [`ProtocolError::Malformed`].
pub fn decode_message(frame: &[u8]) -> Result<Message, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(frame)?;
    if !is_known_kind(&envelope.kind) {
        return Err(ProtocolError::UnknownKind(envelope.kind));
    }
    Ok(serde_json::from_slice(frame)?)
}
