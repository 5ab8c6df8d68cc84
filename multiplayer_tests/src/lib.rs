// Test-only player harness for multiplayer integration tests.
//
// Wraps the real `GameClient` (from `tabula_relay::client`) to provide a
// synchronous, assertion-friendly API for exercising the full session
// pipeline: join, pairing, turn arbitration, action relay, chat, teardown.
//
// The only test-specific code here is the blocking wrappers around
// `GameClient::poll()`. All networking uses the same code paths as a real
// front end.
//
// See also: `tests/session_lifecycle.rs` for the scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};

use tabula_protocol::{GameKind, Message};
use tabula_relay::client::GameClient;

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A test player wrapping a real `GameClient`.
pub struct TestPlayer {
    pub client: GameClient,
}

impl TestPlayer {
    /// Connect to a relay and take a seat in `game_name`, panicking if the
    /// join is refused.
    pub fn join(addr: SocketAddr, name: &str, game_name: &str, kind: GameKind) -> Self {
        let client = GameClient::connect(&addr.to_string(), name, game_name, kind)
            .expect("TestPlayer::join failed");
        Self { client }
    }

    /// Blocking poll until a message matching `pred` arrives; returns it.
    /// Earlier messages are dropped, though their state transitions still
    /// apply because `poll()` runs them.
    pub fn wait_for<F>(&mut self, what: &str, mut pred: F) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            for msg in self.client.poll() {
                if pred(&msg) {
                    return msg;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until this player's turn flag comes up.
    pub fn wait_for_my_turn(&mut self) {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for the turn");
            self.client.poll();
            if self.client.is_my_turn() {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Let in-flight traffic settle, then return everything that arrived.
    pub fn drain(&mut self) -> Vec<Message> {
        thread::sleep(Duration::from_millis(150));
        let mut all = self.client.poll();
        thread::sleep(Duration::from_millis(50));
        all.extend(self.client.poll());
        all
    }

    /// A move with coordinates and a board state blob, sent as an action.
    pub fn send_move(&mut self, from: [u8; 2], to: [u8; 2], board: Value) {
        self.client
            .send_action(move_action(from, to, board))
            .expect("send_action failed");
    }
}

/// Build the payload `TestPlayer::send_move` sends.
pub fn move_action(from: [u8; 2], to: [u8; 2], board: Value) -> Map<String, Value> {
    let mut action = Map::new();
    action.insert("from".into(), json!(from));
    action.insert("to".into(), json!(to));
    action.insert("board_state".into(), board);
    action
}
