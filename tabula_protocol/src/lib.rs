// tabula_protocol — wire protocol for Tabula multiplayer game sessions.
//
// This crate defines the message catalog, framing, and serialization used by
// the session relay (`tabula_relay`) and game clients to communicate over
// TCP. It is shared between both sides and has no dependency on any board
// rule-engine.
//
// Module overview:
// - `types.rs`:    Core wire types, `PlayerNumber` and `GameKind`.
// - `message.rs`:  The closed `Message` enum (one variant per wire kind),
//                  `GameSummary`, and `decode_message`.
// - `framing.rs`:  Newline-delimited framing: one UTF-8 JSON object per
//                  line, a `FrameBuffer` receive accumulator, and the
//                  `MAX_FRAME_LEN` guard.
//
// Design decisions:
// - **JSON on the wire.** One object per line, two top-level keys (`type`,
//   `data`). Human-readable, and board states are already JSON in the
//   callers, so they relay without re-encoding.
// - **Actions as opaque JSON maps.** The relay never inspects move payloads
//   beyond the optional `board_state` member. This keeps the protocol crate
//   independent of any particular game's rules.
// - **No async runtime.** Plain `std::io::Read`/`Write`, compatible with
//   blocking TCP streams and buffered wrappers.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{FrameBuffer, MAX_FRAME_LEN, ProtocolError, encode_message, write_message};
pub use message::{GameSummary, Message, decode_message};
pub use types::{GameKind, PlayerNumber};
