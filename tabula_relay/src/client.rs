// TCP client and protocol state machine for one player.
//
// Mirrors the server's view of a session from a single player's side:
// connected, assigned a slot, then alternating between my-turn and waiting
// until something ends the session. The ending is terminal no matter what
// caused it: opponent loss, an explicit server disconnect, or a dead socket.
//
// Structure:
// - `connect()` dials the relay, spawns a background reader thread, sends
//   the join request, and blocks (with a timeout) for the server's verdict:
//   a `player_assignment` seats us, a `disconnect` explains the refusal.
// - The reader thread feeds a `FrameBuffer`, decodes messages, and pushes
//   them into an mpsc inbox.
// - `poll()` drains the inbox without blocking, applies the state
//   transitions (turn flag, chat log, terminal disconnect), and returns the
//   drained messages for the caller's rule-engine to interpret.
//
// The turn flag is a local mirror of the server's arbitration: sending an
// action while it is down is a logged no-op and nothing hits the wire. The
// server refuses out-of-turn actions anyway; the mirror just keeps a
// well-behaved front end from relying on that.

use std::io::{BufWriter, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use tabula_protocol::{
    FrameBuffer, GameKind, GameSummary, Message, PlayerNumber, ProtocolError, decode_message,
    write_message,
};

/// Cap on the locally kept chat log; oldest entries drop first.
pub const CHAT_LOG_CAP: usize = 200;

/// How long `connect` and `fetch_game_list` wait for the server's reply.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// One line in the local chat log, newest last. Includes our own sent
/// lines, which the relay never echoes back.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatLogEntry {
    pub sender_name: String,
    pub player_number: PlayerNumber,
    pub text: String,
}

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    /// The server refused the join and said why.
    #[error("rejected: {reason}")]
    Rejected { reason: String },
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The session is over or the connection is gone; nothing can be sent
    /// anymore.
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// TCP client for one player's session.
#[derive(Debug)]
pub struct GameClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<Message>,
    _reader_thread: Option<JoinHandle<()>>,
    player_name: String,
    player_number: PlayerNumber,
    game_id: String,
    game_type: GameKind,
    my_turn: bool,
    connected: bool,
    chat_log: Vec<ChatLogEntry>,
}

impl GameClient {
    /// Dial a relay, join (or create) `game_name`, and wait for the
    /// server's verdict.
    pub fn connect(
        addr: &str,
        player_name: &str,
        game_name: &str,
        game_type: GameKind,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(ClientError::Connect)?;
        let _ = stream.set_nodelay(true);
        let reader_stream = stream.try_clone().map_err(ClientError::Connect)?;
        let mut writer = BufWriter::new(stream);

        let (tx, inbox) = mpsc::channel();
        let reader_thread = thread::spawn(move || reader_loop(reader_stream, &tx));

        write_message(
            &mut writer,
            &Message::Connect {
                player_name: player_name.into(),
                game_name: game_name.into(),
                game_type,
            },
        )?;

        // The first frame back decides: seated, or told why not.
        match inbox.recv_timeout(HANDSHAKE_TIMEOUT) {
            Ok(Message::PlayerAssignment {
                player_number,
                game_id,
                game_type,
            }) => {
                debug!("assigned player {player_number} in game '{game_id}'");
                Ok(Self {
                    writer,
                    inbox,
                    _reader_thread: Some(reader_thread),
                    player_name: player_name.into(),
                    player_number,
                    game_id,
                    game_type,
                    // Slot 1 opens the game once the opponent arrives; the
                    // server still confirms with your_turn.
                    my_turn: player_number == PlayerNumber::ONE,
                    connected: true,
                    chat_log: Vec::new(),
                })
            }
            Ok(Message::Disconnect { message, .. }) => {
                Err(ClientError::Rejected { reason: message })
            }
            Ok(other) => Err(ClientError::Handshake(format!(
                "unexpected reply to join: {other:?}"
            ))),
            Err(e) => Err(ClientError::Handshake(e.to_string())),
        }
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn player_number(&self) -> PlayerNumber {
        self.player_number
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn game_type(&self) -> GameKind {
        self.game_type
    }

    /// Local mirror of the server's turn arbitration.
    pub fn is_my_turn(&self) -> bool {
        self.my_turn
    }

    /// False once the session is over, whatever ended it.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Chat lines seen so far, ours included, oldest first.
    pub fn chat_log(&self) -> &[ChatLogEntry] {
        &self.chat_log
    }

    /// Drain everything the server has sent, updating the turn flag, the
    /// chat log, and the terminal disconnect state along the way. The
    /// drained messages come back in arrival order for the caller to
    /// interpret (board updates, game list replies).
    pub fn poll(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(msg) => {
                    self.apply(&msg);
                    messages.push(msg);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Reader thread is gone: EOF, socket error, or a fatal
                    // framing error. Terminal either way.
                    if self.connected {
                        debug!("connection to the relay lost");
                        self.connected = false;
                        self.my_turn = false;
                    }
                    break;
                }
            }
        }
        messages
    }

    fn apply(&mut self, msg: &Message) {
        match msg {
            Message::YourTurn { .. } => self.my_turn = true,
            Message::WaitTurn { .. } => self.my_turn = false,
            Message::PlayerDisconnected { message, .. } => {
                debug!("opponent gone: {message}");
                self.connected = false;
                self.my_turn = false;
            }
            Message::Disconnect { message, .. } => {
                debug!("server ended the session: {message}");
                self.connected = false;
                self.my_turn = false;
            }
            Message::ChatReceive {
                sender_name,
                message,
                player_number,
                ..
            } => {
                self.push_chat(ChatLogEntry {
                    sender_name: sender_name.clone(),
                    player_number: *player_number,
                    text: message.clone(),
                });
            }
            _ => {}
        }
    }

    fn push_chat(&mut self, entry: ChatLogEntry) {
        self.chat_log.push(entry);
        if self.chat_log.len() > CHAT_LOG_CAP {
            let excess = self.chat_log.len() - CHAT_LOG_CAP;
            self.chat_log.drain(..excess);
        }
    }

    /// Send one move. While the turn flag is down this is a local no-op:
    /// logged, nothing transmitted.
    pub fn send_action(&mut self, action: Map<String, Value>) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::Closed);
        }
        if !self.my_turn {
            warn!("not our turn in game '{}', action not sent", self.game_id);
            return Ok(());
        }
        write_message(
            &mut self.writer,
            &Message::GameAction {
                game_id: self.game_id.clone(),
                action,
            },
        )?;
        Ok(())
    }

    /// Send a chat line and record it locally, since the relay never
    /// echoes the sender's own lines back.
    pub fn send_chat(&mut self, text: &str) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::Closed);
        }
        write_message(
            &mut self.writer,
            &Message::ChatSend {
                sender_name: self.player_name.clone(),
                message: text.to_string(),
                player_number: self.player_number,
                game_id: self.game_id.clone(),
            },
        )?;
        self.push_chat(ChatLogEntry {
            sender_name: self.player_name.clone(),
            player_number: self.player_number,
            text: text.to_string(),
        });
        Ok(())
    }

    /// Ask for the joinable games. The `game_list` reply arrives through
    /// `poll()`.
    pub fn request_game_list(&mut self) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::Closed);
        }
        write_message(&mut self.writer, &Message::GetGameList {})?;
        Ok(())
    }

    /// Leave deliberately: best-effort `disconnect` frame, then terminal.
    pub fn disconnect(&mut self) {
        if self.connected {
            let _ = write_message(
                &mut self.writer,
                &Message::Disconnect {
                    message: format!("{} left", self.player_name),
                    game_id: Some(self.game_id.clone()),
                },
            );
        }
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
        self.connected = false;
        self.my_turn = false;
    }
}

/// Reader thread: raw bytes to frames to messages to the inbox. Exits on
/// EOF, a socket error, or a fatal framing error; the dropped sender is
/// what tells `poll()` the connection is gone.
fn reader_loop(mut stream: TcpStream, tx: &Sender<Message>) {
    let mut buf = FrameBuffer::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        buf.feed(&chunk[..n]);
        loop {
            match buf.next_frame() {
                Ok(Some(frame)) => match decode_message(&frame) {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            return;
                        }
                    }
                    Err(ProtocolError::UnknownKind(kind)) => {
                        debug!("ignoring unknown message kind '{kind}' from the relay");
                    }
                    Err(e) => {
                        warn!("bad frame from the relay: {e}");
                        return;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("bad frame from the relay: {e}");
                    return;
                }
            }
        }
    }
}

/// One-shot lobby helper: connect, ask for the joinable games, return the
/// reply, drop the socket. No session is joined.
pub fn fetch_game_list(addr: &str) -> Result<Vec<GameSummary>, ClientError> {
    let mut stream = TcpStream::connect(addr).map_err(ClientError::Connect)?;
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(ClientError::Connect)?;
    write_message(&mut stream, &Message::GetGameList {})?;

    let mut buf = FrameBuffer::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut chunk)
            .map_err(|e| ClientError::Handshake(format!("read failed: {e}")))?;
        if n == 0 {
            return Err(ClientError::Handshake(
                "relay closed before replying".into(),
            ));
        }
        buf.feed(&chunk[..n]);
        while let Some(frame) = buf.next_frame()? {
            match decode_message(&frame) {
                Ok(Message::GameList { games }) => return Ok(games),
                Ok(other) => {
                    return Err(ClientError::Handshake(format!(
                        "unexpected reply to a list request: {other:?}"
                    )));
                }
                Err(ProtocolError::UnknownKind(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}
