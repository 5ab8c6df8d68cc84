// Connection bookkeeping for the relay coordinator.
//
// The coordinator thread owns one `ConnectionTable` for the whole process.
// Every accepted socket gets a `ConnectionId` and a buffered write half here;
// reader threads never touch the table. All outbound traffic funnels through
// `send`, so the coordinator is the only writer to any client stream.
//
// Removal shuts the socket down (both halves) so the connection's reader
// thread wakes up with EOF and exits. Removal is idempotent: the same
// connection can be reported dead by its reader and by a failed write, and
// the second report finds nothing to do.

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};

use tabula_protocol::{Message, ProtocolError, write_message};

/// Process-unique id for one accepted TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-connection state owned by the coordinator.
pub struct Peer {
    writer: BufWriter<TcpStream>,
    /// Set once the connection has been seated in a session.
    pub game_id: Option<String>,
}

/// All live connections, keyed by id.
#[derive(Default)]
pub struct ConnectionTable {
    peers: BTreeMap<ConnectionId, Peer>,
    next_id: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted stream and hand back its id.
    pub fn insert(&mut self, stream: TcpStream) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.peers.insert(
            id,
            Peer {
                writer: BufWriter::new(stream),
                game_id: None,
            },
        );
        id
    }

    /// Framed write to one connection. Sending to an id that has already
    /// been removed is a no-op, matching the idempotent removal story: late
    /// messages for a torn-down connection go nowhere. The caller decides
    /// what a real write failure means (fatal on the game path, advisory
    /// for chat).
    pub fn send(&mut self, id: ConnectionId, msg: &Message) -> Result<(), ProtocolError> {
        match self.peers.get_mut(&id) {
            Some(peer) => write_message(&mut peer.writer, msg),
            None => Ok(()),
        }
    }

    /// Record which session the connection was seated in.
    pub fn set_game(&mut self, id: ConnectionId, game_id: &str) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.game_id = Some(game_id.to_string());
        }
    }

    /// Unseat the connection. Session names can be reused, so a binding
    /// must never outlive the session it names.
    pub fn clear_game(&mut self, id: ConnectionId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.game_id = None;
        }
    }

    /// The session this connection was seated in, if any.
    pub fn game_of(&self, id: ConnectionId) -> Option<&str> {
        self.peers.get(&id).and_then(|p| p.game_id.as_deref())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Drop a connection: best-effort socket shutdown, then forget it.
    /// Returns the peer so the caller can see which session it was in.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        let _ = peer.writer.get_ref().shutdown(Shutdown::Both);
        Some(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
