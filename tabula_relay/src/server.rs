// TCP server and coordinator loop for the session relay.
//
// Architecture: thread-per-reader with a central mpsc channel.
//
// - Listener thread: accepts sockets and forwards them to the coordinator
//   as `InternalEvent::NewConnection`. Non-blocking accept so it can check
//   the shutdown flag between attempts.
// - Reader threads (one per connection): blocking-read raw bytes into a
//   `FrameBuffer`, decode frames, and send `InternalEvent::MessageFrom`.
//   Unknown message kinds are logged and skipped right here; a malformed or
//   oversized frame ends the connection. Exactly one `Disconnected` event
//   is sent when a reader exits, whatever the cause.
// - Coordinator thread: owns the `ConnectionTable` and the `Registry`,
//   drains the channel, and dispatches every event. It is the only writer
//   to any client stream, which makes it the mutual-exclusion boundary for
//   all session state: an action is fully applied (forwarded, turn flipped,
//   both players notified) before the next event is looked at.
//
// The coordinator's `recv_timeout` doubles as the forfeit timer: between
// events it sweeps for turn holders that outlived the configured timeout.
//
// Shutdown: `ServerHandle::stop` clears `keep_running`; the listener and
// coordinator loops notice and wind down.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tabula_protocol::{FrameBuffer, GameKind, Message, ProtocolError, decode_message};

use crate::connection::{ConnectionId, ConnectionTable};
use crate::registry::Registry;
use crate::session::{SessionError, SessionPhase};

/// How long the coordinator waits for an event before checking the
/// shutdown flag, and how often expired turns are swept.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Read chunk size for connection readers.
const READ_CHUNK: usize = 4096;

/// Events sent from the listener and reader threads to the coordinator.
enum InternalEvent {
    NewConnection { stream: TcpStream },
    MessageFrom { conn: ConnectionId, message: Message },
    Disconnected { conn: ConnectionId },
}

/// Configuration for starting a relay.
pub struct ServerConfig {
    /// Bind address, a hostname or IP.
    pub host: String,
    /// Listen port. 0 lets the OS pick one; `start_server` returns the
    /// actual address.
    pub port: u16,
    /// `listen()` queue depth for pending, not-yet-accepted connections.
    /// Per-game capacity stays two regardless.
    pub backlog: u32,
    /// Forfeit a turn holder that has been silent this long. `None` lets a
    /// silent player block their session indefinitely.
    pub turn_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7171,
            backlog: 128,
            turn_timeout: None,
        }
    }
}

/// Handle returned by `start_server` to control the running relay.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the relay to stop and wait for the coordinator to finish.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound address.
pub fn start_server(config: ServerConfig) -> std::io::Result<(ServerHandle, SocketAddr)> {
    let listener = bind_listener(&config)?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    let thread = thread::spawn(move || {
        run_server(listener, config, keep_running_clone);
    });

    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Bind the listening socket. Built through `socket2` because the accept
/// backlog is configurable; `std::net` hardcodes its own.
fn bind_listener(config: &ServerConfig) -> std::io::Result<TcpListener> {
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("host '{}' did not resolve", config.host),
            )
        })?;
    let domain = if addr.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(config.backlog).unwrap_or(i32::MAX))?;
    Ok(socket.into())
}

/// Coordinator loop. Runs until `keep_running` is cleared.
fn run_server(listener: TcpListener, config: ServerConfig, keep_running: Arc<AtomicBool>) {
    let mut conns = ConnectionTable::new();
    let mut registry = Registry::new();

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Non-blocking accept so the listener thread can observe shutdown.
    if let Err(e) = listener.set_nonblocking(true) {
        warn!("could not make the listener non-blocking: {e}");
    }
    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    // Readers block; writes are small and latency-bound.
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_nodelay(true);
                    debug!("accepted connection from {addr}");
                    if tx_listener
                        .send(InternalEvent::NewConnection { stream })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!("listener error: {e}");
                    break;
                }
            }
        }
    });

    let mut last_sweep = Instant::now();
    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(SWEEP_INTERVAL) {
            Ok(event) => {
                handle_event(&mut conns, &mut registry, event, &tx, &keep_running);
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut conns, &mut registry, event, &tx, &keep_running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if let Some(limit) = config.turn_timeout {
            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                forfeit_expired(&mut conns, &mut registry, limit);
                last_sweep = Instant::now();
            }
        }
    }
    info!("relay coordinator stopped");
}

fn handle_event(
    conns: &mut ConnectionTable,
    registry: &mut Registry,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            let reader = match stream.try_clone() {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("dropping a fresh connection, clone failed: {e}");
                    return;
                }
            };
            let conn = conns.insert(stream);
            let tx_reader = tx.clone();
            let keep_running_reader = keep_running.clone();
            thread::spawn(move || {
                reader_loop(reader, conn, tx_reader, keep_running_reader);
            });
        }
        InternalEvent::MessageFrom { conn, message } => {
            handle_message(conns, registry, conn, message);
        }
        InternalEvent::Disconnected { conn } => {
            teardown(conns, registry, conn, "lost connection");
        }
    }
}

/// Reader loop for one connection. Feeds raw bytes into a `FrameBuffer`,
/// decodes complete frames, and funnels them to the coordinator.
fn reader_loop(
    mut stream: TcpStream,
    conn: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    let mut buf = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    'read: while keep_running.load(Ordering::SeqCst) {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break 'read,
            Ok(n) => n,
            Err(e) => {
                debug!("connection {conn}: read error: {e}");
                break 'read;
            }
        };
        buf.feed(&chunk[..n]);
        loop {
            match buf.next_frame() {
                Ok(Some(frame)) => match decode_message(&frame) {
                    Ok(message) => {
                        if tx.send(InternalEvent::MessageFrom { conn, message }).is_err() {
                            // Coordinator is gone; no one left to notify.
                            return;
                        }
                    }
                    Err(ProtocolError::UnknownKind(kind)) => {
                        debug!("connection {conn}: ignoring unknown message kind '{kind}'");
                    }
                    Err(e) => {
                        warn!("connection {conn}: {e}; closing");
                        break 'read;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("connection {conn}: {e}; closing");
                    break 'read;
                }
            }
        }
    }

    let _ = tx.send(InternalEvent::Disconnected { conn });
}

/// Route one decoded message. Events can sit in the channel behind a
/// teardown of their sender, so anything from a connection no longer in the
/// table is dropped up front.
fn handle_message(
    conns: &mut ConnectionTable,
    registry: &mut Registry,
    conn: ConnectionId,
    message: Message,
) {
    if !conns.contains(conn) {
        debug!("connection {conn}: message after teardown dropped");
        return;
    }
    match message {
        Message::Connect {
            player_name,
            game_name,
            game_type,
        } => {
            handle_connect(conns, registry, conn, player_name, game_name, game_type);
        }
        Message::GameAction { game_id, action } => {
            let Some(session) = registry.get_mut(&game_id) else {
                debug!("connection {conn}: action for unknown game '{game_id}' ignored");
                return;
            };
            match session.submit_action(conns, conn, &action) {
                Ok(()) => {}
                Err(SessionError::SendFailed { conn: failed, source }) => {
                    warn!("game '{game_id}': write failed: {source}");
                    teardown(conns, registry, failed, "lost connection");
                }
                Err(refusal) => {
                    debug!("connection {conn}: action on '{game_id}' refused: {refusal}");
                }
            }
        }
        Message::ChatSend {
            sender_name,
            message,
            player_number,
            game_id,
        } => {
            let Some(session) = registry.get_mut(&game_id) else {
                debug!("connection {conn}: chat for unknown game '{game_id}' ignored");
                return;
            };
            if let Err(refusal) =
                session.relay_chat(conns, conn, &sender_name, &message, player_number)
            {
                debug!("connection {conn}: chat on '{game_id}' refused: {refusal}");
            }
        }
        Message::GetGameList {} => {
            let reply = Message::GameList {
                games: registry.list_joinable(),
            };
            if let Err(e) = conns.send(conn, &reply) {
                warn!("connection {conn}: game list write failed: {e}");
                teardown(conns, registry, conn, "lost connection");
            }
        }
        Message::Disconnect { message, .. } => {
            debug!("connection {conn}: disconnect requested: {message}");
            teardown(conns, registry, conn, "left the game");
        }
        // Server-to-client kinds arriving at the server are protocol
        // violations: logged and ignored.
        Message::PlayerAssignment { .. }
        | Message::YourTurn { .. }
        | Message::WaitTurn { .. }
        | Message::PlayerDisconnected { .. }
        | Message::ChatReceive { .. }
        | Message::GameList { .. } => {
            debug!("connection {conn}: ignoring a server-side message kind from a client");
        }
    }
}

/// Matchmaking: seat the connection in the named session, creating the
/// session if the name is new. A refused joiner always gets an explicit
/// `disconnect` saying why before the socket closes.
fn handle_connect(
    conns: &mut ConnectionTable,
    registry: &mut Registry,
    conn: ConnectionId,
    player_name: String,
    game_name: String,
    game_type: GameKind,
) {
    if conns.game_of(conn).is_some() {
        debug!("connection {conn}: connect while already seated ignored");
        return;
    }

    let session = registry.get_or_create(&game_name, game_type);
    if session.kind() != game_type {
        // A mismatch can only hit a pre-existing session, so nothing was
        // created above.
        let kind = session.kind();
        reject(
            conns,
            registry,
            conn,
            format!("game '{game_name}' is a {kind} game"),
            Some(game_name),
        );
        return;
    }

    match session.add_player(conn, player_name.clone()) {
        Ok(number) => {
            conns.set_game(conn, &game_name);
            info!("'{player_name}' joined game '{game_name}' as player {number}");
            let assignment = Message::PlayerAssignment {
                player_number: number,
                game_id: game_name.clone(),
                game_type,
            };
            if let Err(e) = conns.send(conn, &assignment) {
                warn!("connection {conn}: assignment write failed: {e}");
                teardown(conns, registry, conn, "lost connection");
                return;
            }
            // Second seat filled: both players hear whose turn it is, after
            // the new player's assignment.
            let Some(session) = registry.get_mut(&game_name) else {
                return;
            };
            if session.phase() == SessionPhase::Active {
                if let Err(SessionError::SendFailed { conn: failed, source }) =
                    session.announce_turn(conns)
                {
                    warn!("game '{game_name}': turn notice write failed: {source}");
                    teardown(conns, registry, failed, "lost connection");
                }
            }
        }
        Err(_) => {
            reject(
                conns,
                registry,
                conn,
                format!("game '{game_name}' is full"),
                Some(game_name),
            );
        }
    }
}

/// Send one explicit `disconnect` carrying the rejection reason, then close
/// the connection.
fn reject(
    conns: &mut ConnectionTable,
    registry: &mut Registry,
    conn: ConnectionId,
    message: String,
    game_id: Option<String>,
) {
    info!("connection {conn} rejected: {message}");
    let note = Message::Disconnect { message, game_id };
    if let Err(e) = conns.send(conn, &note) {
        debug!("connection {conn}: rejection write failed: {e}");
    }
    teardown(conns, registry, conn, "rejected");
}

/// Tear down one connection: drop it from the table, and if it was seated,
/// finish that session and notify the survivor. Idempotent, because the
/// reader and a failed write can both report the same connection.
fn teardown(conns: &mut ConnectionTable, registry: &mut Registry, conn: ConnectionId, reason: &str) {
    let Some(peer) = conns.remove(conn) else {
        return;
    };
    let Some(game_id) = peer.game_id else {
        debug!("connection {conn} closed ({reason})");
        return;
    };
    // The survivor's session is gone from the registry by the time they are
    // notified, so a failure there cannot recurse deeper than once.
    let Some(mut session) = registry.remove(&game_id) else {
        return;
    };
    info!("game '{game_id}' over: connection {conn} {reason}");
    if let Err(SessionError::SendFailed { conn: failed, source }) =
        session.remove_player(conns, conn, reason)
    {
        debug!("game '{game_id}': survivor notification failed: {source}");
        teardown(conns, registry, failed, "lost connection");
    }
}

/// Forfeit every turn holder that has been silent past `limit`. The timed
/// out player is told why before their connection closes; the opponent
/// gets the usual `player_disconnected`.
fn forfeit_expired(conns: &mut ConnectionTable, registry: &mut Registry, limit: Duration) {
    for conn in registry.expired_turns(limit) {
        info!("connection {conn} forfeits on turn timeout");
        let note = Message::Disconnect {
            message: "turn timeout".into(),
            game_id: conns.game_of(conn).map(str::to_string),
        };
        if let Err(e) = conns.send(conn, &note) {
            debug!("connection {conn}: forfeit notice failed: {e}");
        }
        teardown(conns, registry, conn, "forfeited on turn timeout");
    }
}
