// Session registry and matchmaking.
//
// Maps game name to session. The name doubles as the session id: a client
// that connects with a fresh name creates the session, one that names an
// existing session joins it. The coordinator thread owns the registry, so
// there is no locking here.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

use tabula_protocol::{GameKind, GameSummary};

use crate::connection::ConnectionId;
use crate::session::Session;

/// All sessions, keyed by game name.
#[derive(Default)]
pub struct Registry {
    sessions: BTreeMap<String, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session by name, or a freshly created empty one with the
    /// requested rule-set.
    pub fn get_or_create(&mut self, name: &str, kind: GameKind) -> &mut Session {
        self.sessions.entry(name.to_string()).or_insert_with(|| {
            info!("created game '{name}' ({kind})");
            Session::new(name, kind)
        })
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.sessions.get_mut(name)
    }

    /// Detach a session so teardown can notify its survivor after the map
    /// no longer lists it.
    pub fn remove(&mut self, name: &str) -> Option<Session> {
        self.sessions.remove(name)
    }

    /// Sessions still waiting for an opponent, for `game_list` replies.
    pub fn list_joinable(&self) -> Vec<GameSummary> {
        self.sessions
            .values()
            .filter(|s| s.is_joinable())
            .map(Session::summary)
            .collect()
    }

    /// Connections holding a turn that has outlived `limit`.
    pub fn expired_turns(&self, limit: Duration) -> Vec<ConnectionId> {
        self.sessions
            .values()
            .filter_map(|s| s.turn_expired(limit))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
