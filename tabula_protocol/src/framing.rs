// Newline-delimited message framing over TCP.
//
// One frame per line: a UTF-8 JSON object followed by a single `\n`. The
// read side is a plain byte accumulator: reader loops `feed()` whatever the
// socket hands them and pull complete frames off with `next_frame()`. The
// accumulator never inspects the JSON; decoding lives in `message.rs`.
//
// `MAX_FRAME_LEN` bounds per-connection buffering. A peer that streams an
// overlong line is cut off instead of growing the buffer without limit, and
// an oversized outbound message fails before anything hits the socket.

use std::io::{self, Write};

use serde::Serialize;
use thiserror::Error;

/// Maximum frame length in bytes, delimiter excluded. Board states for the
/// supported games are a few KiB; 64 KiB is generous headroom.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Errors raised by framing and message decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame, or the unterminated tail of the stream, exceeded
    /// [`MAX_FRAME_LEN`]. The stream cannot be resynchronized after this.
    #[error("frame too long: {0} bytes (max {MAX_FRAME_LEN})")]
    FrameTooLong(usize),

    /// A well-formed `{type, data}` object named a kind the catalog does not
    /// define. Ignorable: the dispatcher logs and skips it.
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),

    /// The frame was not a well-formed message of a known kind. Fatal to the
    /// connection.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Serialize a message into a single frame: JSON plus the trailing `\n`.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = serde_json::to_vec(msg)?;
    if frame.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLong(frame.len()));
    }
    frame.push(b'\n');
    Ok(frame)
}

/// Encode a message and write it out, flushing so it leaves immediately.
pub fn write_message<W: Write, T: Serialize>(
    writer: &mut W,
    msg: &T,
) -> Result<(), ProtocolError> {
    let frame = encode_message(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Per-connection receive accumulator: bytes not yet split into a frame.
///
/// Owned exclusively by the reader that feeds it.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw bytes from the stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Split off the next complete frame, skipping empty lines.
    ///
    /// Returns `Ok(None)` when no full frame is buffered yet.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        loop {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    if pos > MAX_FRAME_LEN {
                        return Err(ProtocolError::FrameTooLong(pos));
                    }
                    let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
                    frame.pop();
                    if frame.is_empty() {
                        continue;
                    }
                    return Ok(Some(frame));
                }
                None => {
                    if self.buf.len() > MAX_FRAME_LEN {
                        return Err(ProtocolError::FrameTooLong(self.buf.len()));
                    }
                    return Ok(None);
                }
            }
        }
    }
}
