// tabula_relay — session relay and matchmaker for Tabula board games.
//
// The relay is a thin arbiter between two players. It seats them into named
// sessions, enforces whose turn it is, and forwards moves and chat between
// them. Board rules stay in the clients: every action and board state is
// opaque JSON the relay passes along verbatim.
//
// Module overview:
// - connection.rs: `ConnectionTable`, ids and buffered write halves for
//   every accepted socket. The coordinator's send path.
// - session.rs: one two-player pairing. Slots, the turn holder, the last
//   relayed board state, chat fan-out.
// - registry.rs: name-to-session map. Matchmaking and the game list.
// - server.rs: TCP listener, one reader thread per connection, and the
//   coordinator event loop that owns all state.
// - client.rs: `GameClient`, the player-side protocol state machine. Usable
//   by any front end and by the integration tests.
//
// The relay runs standalone (`main.rs`) or embedded via `start_server`,
// which is how the tests drive it.

pub mod client;
pub mod connection;
pub mod registry;
pub mod server;
pub mod session;

pub use client::{ClientError, GameClient, fetch_game_list};
pub use server::{ServerConfig, ServerHandle, start_server};
