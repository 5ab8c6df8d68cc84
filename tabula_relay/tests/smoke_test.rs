// Wire-level integration tests against a live relay.
//
// These speak the protocol over raw TCP sockets on purpose: no GameClient,
// so misbehavior the client would never produce (garbage frames, unknown
// kinds, out-of-turn actions) can be put on the wire directly.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};

use tabula_protocol::{
    FrameBuffer, GameKind, Message, PlayerNumber, decode_message, write_message,
};
use tabula_relay::server::{ServerConfig, ServerHandle, start_server};

fn start_relay() -> (ServerHandle, SocketAddr) {
    let config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    let (handle, addr) = start_server(config).unwrap();
    thread::sleep(Duration::from_millis(50));
    (handle, addr)
}

/// A test client that frames and decodes by hand.
struct RawClient {
    stream: TcpStream,
    buf: FrameBuffer,
}

impl RawClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            buf: FrameBuffer::new(),
        }
    }

    fn send(&mut self, msg: &Message) {
        write_message(&mut self.stream, msg).unwrap();
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
        self.stream.flush().unwrap();
    }

    fn recv(&mut self) -> Message {
        loop {
            if let Some(frame) = self.buf.next_frame().unwrap() {
                return decode_message(&frame).unwrap();
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed while waiting for a message");
            self.buf.feed(&chunk[..n]);
        }
    }

    /// True once the relay has closed this connection.
    fn closed(&mut self) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut chunk = [0u8; 4096];
        while Instant::now() < deadline {
            match self.stream.read(&mut chunk) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(_) => return true,
            }
        }
        false
    }

    /// True when nothing arrives within a short window.
    fn quiet(&mut self) -> bool {
        if matches!(self.buf.next_frame(), Ok(Some(_))) {
            return false;
        }
        self.stream
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        let mut chunk = [0u8; 4096];
        let outcome = match self.stream.read(&mut chunk) {
            Ok(0) => false,
            Ok(n) => {
                self.buf.feed(&chunk[..n]);
                false
            }
            Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        };
        self.stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        outcome
    }
}

/// Connect and join, asserting the seat was granted.
fn join(addr: SocketAddr, player: &str, game: &str, kind: GameKind) -> (RawClient, PlayerNumber) {
    let mut client = RawClient::connect(addr);
    client.send(&Message::Connect {
        player_name: player.into(),
        game_name: game.into(),
        game_type: kind,
    });
    match client.recv() {
        Message::PlayerAssignment {
            player_number,
            game_id,
            game_type,
        } => {
            assert_eq!(game_id, game);
            assert_eq!(game_type, kind);
            (client, player_number)
        }
        other => panic!("expected player_assignment, got {other:?}"),
    }
}

fn action(from: [u8; 2], to: [u8; 2], board: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("from".into(), json!(from));
    map.insert("to".into(), json!(to));
    map.insert("board_state".into(), json!({ "cells": board }));
    map
}

#[test]
fn full_session_lifecycle() {
    let (relay, addr) = start_relay();

    let (mut alice, n1) = join(addr, "Alice", "g1", GameKind::Katerenga);
    assert_eq!(n1, PlayerNumber::ONE);
    let (mut bob, n2) = join(addr, "Bob", "g1", GameKind::Katerenga);
    assert_eq!(n2, PlayerNumber::TWO);

    // Activation: holder first.
    assert!(matches!(alice.recv(), Message::YourTurn { game_id } if game_id == "g1"));
    assert!(matches!(bob.recv(), Message::WaitTurn { game_id } if game_id == "g1"));

    // Alice moves; Bob sees the action itself before his turn grant.
    let first = action([1, 1], [1, 2], "after move 1");
    alice.send(&Message::GameAction {
        game_id: "g1".into(),
        action: first.clone(),
    });
    match bob.recv() {
        Message::GameAction { game_id, action } => {
            assert_eq!(game_id, "g1");
            assert_eq!(action, first);
        }
        other => panic!("expected the forwarded action, got {other:?}"),
    }
    assert!(matches!(bob.recv(), Message::YourTurn { .. }));
    assert!(matches!(alice.recv(), Message::WaitTurn { .. }));

    // Bob answers; the turn comes back to Alice.
    let second = action([7, 7], [7, 6], "after move 2");
    bob.send(&Message::GameAction {
        game_id: "g1".into(),
        action: second.clone(),
    });
    match alice.recv() {
        Message::GameAction { action, .. } => assert_eq!(action, second),
        other => panic!("expected the forwarded action, got {other:?}"),
    }
    assert!(matches!(alice.recv(), Message::YourTurn { .. }));
    assert!(matches!(bob.recv(), Message::WaitTurn { .. }));

    relay.stop();
}

#[test]
fn third_join_is_rejected_with_a_reason() {
    let (relay, addr) = start_relay();

    let (_alice, _) = join(addr, "Alice", "g1", GameKind::Katerenga);
    let (_bob, _) = join(addr, "Bob", "g1", GameKind::Katerenga);

    let mut carol = RawClient::connect(addr);
    carol.send(&Message::Connect {
        player_name: "Carol".into(),
        game_name: "g1".into(),
        game_type: GameKind::Katerenga,
    });
    match carol.recv() {
        Message::Disconnect { message, game_id } => {
            assert!(message.contains("full"), "reason was: {message}");
            assert_eq!(game_id.as_deref(), Some("g1"));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(carol.closed());

    relay.stop();
}

#[test]
fn rule_set_mismatch_is_rejected() {
    let (relay, addr) = start_relay();

    let (_alice, _) = join(addr, "Alice", "g1", GameKind::Katerenga);

    let mut bob = RawClient::connect(addr);
    bob.send(&Message::Connect {
        player_name: "Bob".into(),
        game_name: "g1".into(),
        game_type: GameKind::Isolation,
    });
    match bob.recv() {
        Message::Disconnect { message, .. } => {
            assert!(message.contains("katerenga"), "reason was: {message}");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(bob.closed());

    relay.stop();
}

#[test]
fn unknown_message_kinds_are_ignored() {
    let (relay, addr) = start_relay();

    let mut client = RawClient::connect(addr);
    client.send_raw(b"{\"type\":\"ping\",\"data\":{}}\n");
    client.send(&Message::GetGameList {});
    assert!(matches!(client.recv(), Message::GameList { games } if games.is_empty()));

    relay.stop();
}

#[test]
fn malformed_frame_ends_the_connection() {
    let (relay, addr) = start_relay();

    let (mut alice, _) = join(addr, "Alice", "g1", GameKind::Congress);
    let (mut bob, _) = join(addr, "Bob", "g1", GameKind::Congress);
    assert!(matches!(alice.recv(), Message::YourTurn { .. }));
    assert!(matches!(bob.recv(), Message::WaitTurn { .. }));

    alice.send_raw(b"this is not json\n");
    assert!(alice.closed());

    // The teardown reaches the opponent as a normal disconnect notice.
    match bob.recv() {
        Message::PlayerDisconnected { message, game_id } => {
            assert_eq!(game_id, "g1");
            assert!(message.contains("Alice"), "notice was: {message}");
        }
        other => panic!("expected player_disconnected, got {other:?}"),
    }

    relay.stop();
}

#[test]
fn oversized_frame_ends_the_connection() {
    let (relay, addr) = start_relay();

    let mut client = RawClient::connect(addr);
    client.send_raw(&vec![b'x'; 70_000]);
    assert!(client.closed());

    relay.stop();
}

#[test]
fn out_of_turn_action_is_not_forwarded() {
    let (relay, addr) = start_relay();

    let (mut alice, _) = join(addr, "Alice", "g1", GameKind::Katerenga);
    let (mut bob, _) = join(addr, "Bob", "g1", GameKind::Katerenga);
    assert!(matches!(alice.recv(), Message::YourTurn { .. }));
    assert!(matches!(bob.recv(), Message::WaitTurn { .. }));

    // Bob jumps the queue; nothing reaches Alice.
    bob.send(&Message::GameAction {
        game_id: "g1".into(),
        action: action([9, 9], [9, 8], "cheat"),
    });
    assert!(alice.quiet(), "the out-of-turn action leaked through");

    // The turn still belongs to Alice.
    let legit = action([1, 1], [1, 2], "fine");
    alice.send(&Message::GameAction {
        game_id: "g1".into(),
        action: legit.clone(),
    });
    match bob.recv() {
        Message::GameAction { action, .. } => assert_eq!(action, legit),
        other => panic!("expected the forwarded action, got {other:?}"),
    }

    relay.stop();
}

#[test]
fn action_for_an_unknown_game_is_ignored() {
    let (relay, addr) = start_relay();

    let mut client = RawClient::connect(addr);
    client.send(&Message::GameAction {
        game_id: "nowhere".into(),
        action: action([1, 1], [2, 2], "ghost"),
    });
    // Still alive and served.
    client.send(&Message::GetGameList {});
    assert!(matches!(client.recv(), Message::GameList { .. }));

    relay.stop();
}

#[test]
fn deliberate_leave_notifies_the_survivor() {
    let (relay, addr) = start_relay();

    let (mut alice, _) = join(addr, "Alice", "g1", GameKind::Isolation);
    let (mut bob, _) = join(addr, "Bob", "g1", GameKind::Isolation);
    assert!(matches!(alice.recv(), Message::YourTurn { .. }));
    assert!(matches!(bob.recv(), Message::WaitTurn { .. }));

    alice.send(&Message::Disconnect {
        message: "had to go".into(),
        game_id: Some("g1".into()),
    });
    match bob.recv() {
        Message::PlayerDisconnected { message, .. } => {
            assert_eq!(message, "Alice left the game");
        }
        other => panic!("expected player_disconnected, got {other:?}"),
    }
    assert!(alice.closed());

    // The session is gone: a late action goes nowhere, but Bob's
    // connection itself still works.
    bob.send(&Message::GameAction {
        game_id: "g1".into(),
        action: action([1, 1], [1, 2], "too late"),
    });
    bob.send(&Message::GetGameList {});
    assert!(matches!(bob.recv(), Message::GameList { games } if games.is_empty()));

    relay.stop();
}

#[test]
fn lingering_survivor_close_leaves_the_reused_name_alone() {
    let (relay, addr) = start_relay();

    let (mut alice, _) = join(addr, "Alice", "arena", GameKind::Katerenga);
    let (mut bob, _) = join(addr, "Bob", "arena", GameKind::Katerenga);
    assert!(matches!(alice.recv(), Message::YourTurn { .. }));
    assert!(matches!(bob.recv(), Message::WaitTurn { .. }));

    // Alice drops; Bob is notified but his socket lingers.
    drop(alice);
    assert!(matches!(bob.recv(), Message::PlayerDisconnected { .. }));

    // The name is free again and a second pairing takes it, under a
    // different rule set. A leftover registry entry would reject these
    // joins as a rule-set mismatch.
    let (mut carol, n1) = join(addr, "Carol", "arena", GameKind::Isolation);
    assert_eq!(n1, PlayerNumber::ONE);
    let (mut dave, n2) = join(addr, "Dave", "arena", GameKind::Isolation);
    assert_eq!(n2, PlayerNumber::TWO);
    assert!(matches!(carol.recv(), Message::YourTurn { .. }));
    assert!(matches!(dave.recv(), Message::WaitTurn { .. }));

    // Only now does the stale survivor go away.
    drop(bob);
    thread::sleep(Duration::from_millis(100));

    // The successor session must not notice: Carol's move still reaches
    // Dave and the turn still flips.
    let opening = action([2, 2], [2, 3], "opening");
    carol.send(&Message::GameAction {
        game_id: "arena".into(),
        action: opening.clone(),
    });
    match dave.recv() {
        Message::GameAction { game_id, action } => {
            assert_eq!(game_id, "arena");
            assert_eq!(action, opening);
        }
        other => panic!("expected the forwarded action, got {other:?}"),
    }
    assert!(matches!(dave.recv(), Message::YourTurn { .. }));
    assert!(matches!(carol.recv(), Message::WaitTurn { .. }));

    relay.stop();
}

#[test]
fn waiting_games_are_listed_with_occupancy() {
    let (relay, addr) = start_relay();

    let (_alice, _) = join(addr, "Alice", "open-game", GameKind::Congress);
    let (_bob, _) = join(addr, "Bob", "busy-game", GameKind::Katerenga);
    let (_carol, _) = join(addr, "Carol", "busy-game", GameKind::Katerenga);

    let mut lobby = RawClient::connect(addr);
    lobby.send(&Message::GetGameList {});
    match lobby.recv() {
        Message::GameList { games } => {
            assert_eq!(games.len(), 1);
            assert_eq!(games[0].game_id, "open-game");
            assert_eq!(games[0].game_type, GameKind::Congress);
            assert_eq!(games[0].player_count, 1);
            assert_eq!(games[0].max_players, 2);
        }
        other => panic!("expected game_list, got {other:?}"),
    }

    relay.stop();
}

#[test]
fn chat_is_relayed_without_echo() {
    let (relay, addr) = start_relay();

    let (mut alice, _) = join(addr, "Alice", "g1", GameKind::Katerenga);
    let (mut bob, _) = join(addr, "Bob", "g1", GameKind::Katerenga);
    assert!(matches!(alice.recv(), Message::YourTurn { .. }));
    assert!(matches!(bob.recv(), Message::WaitTurn { .. }));

    alice.send(&Message::ChatSend {
        sender_name: "Alice".into(),
        message: "good luck".into(),
        player_number: PlayerNumber::ONE,
        game_id: "g1".into(),
    });
    match bob.recv() {
        Message::ChatReceive {
            sender_name,
            message,
            player_number,
            game_id,
        } => {
            assert_eq!(sender_name, "Alice");
            assert_eq!(message, "good luck");
            assert_eq!(player_number, PlayerNumber::ONE);
            assert_eq!(game_id, "g1");
        }
        other => panic!("expected chat_receive, got {other:?}"),
    }
    assert!(alice.quiet(), "the sender got an echo");

    relay.stop();
}

#[test]
fn chat_from_an_outsider_is_ignored() {
    let (relay, addr) = start_relay();

    let (mut alice, _) = join(addr, "Alice", "g1", GameKind::Katerenga);
    let (mut bob, _) = join(addr, "Bob", "g1", GameKind::Katerenga);
    assert!(matches!(alice.recv(), Message::YourTurn { .. }));
    assert!(matches!(bob.recv(), Message::WaitTurn { .. }));

    let (mut mallory, _) = join(addr, "Mallory", "g2", GameKind::Katerenga);
    mallory.send(&Message::ChatSend {
        sender_name: "Mallory".into(),
        message: "let me in".into(),
        player_number: PlayerNumber::ONE,
        game_id: "g1".into(),
    });

    assert!(alice.quiet() && bob.quiet(), "outsider chat leaked through");

    relay.stop();
}
