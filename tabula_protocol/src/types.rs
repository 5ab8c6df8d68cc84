// Core wire types for the session protocol.
//
// Lightweight types used by both `message.rs` and the relay's session
// management (`tabula_relay::session`). `PlayerNumber` follows the wire
// convention of the original clients: slots are 1-indexed, and slot 1
// always moves first.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two player positions within a session. Serializes as the bare
/// number (1 or 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerNumber(pub u8);

impl PlayerNumber {
    pub const ONE: PlayerNumber = PlayerNumber(1);
    pub const TWO: PlayerNumber = PlayerNumber(2);

    /// The opposing slot.
    pub fn other(self) -> PlayerNumber {
        if self.0 == 1 {
            PlayerNumber(2)
        } else {
            PlayerNumber(1)
        }
    }

    /// Zero-based slot index for array storage.
    pub fn index(self) -> usize {
        usize::from(self.0.saturating_sub(1))
    }
}

impl fmt::Display for PlayerNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three supported rule-sets. Lowercase names on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Katerenga,
    Isolation,
    Congress,
}

impl GameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GameKind::Katerenga => "katerenga",
            GameKind::Isolation => "isolation",
            GameKind::Congress => "congress",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
