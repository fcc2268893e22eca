//! RFC 6455 handshake and frame codec.
//!
//! Server frames are never masked. Client frames are accepted masked or
//! unmasked so simple local tools can talk to the socket.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client key before hashing.
pub const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest payload accepted from a client.
pub const MAX_PAYLOAD: u64 = 1024 * 1024;

/// Control frames carry at most this many payload bytes.
const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("frame payload of {0} bytes exceeds limit")]
    TooLarge(u64),

    #[error("control frame is fragmented or too long")]
    MalformedControl,

    #[error("reserved bits set")]
    ReservedBits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A decoded frame with its payload unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The `101 Switching Protocols` response completing the handshake.
pub fn handshake_response(client_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
    .into_bytes()
}

/// Encode a single final frame. `mask` is only used by clients.
pub fn encode_frame(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Try to decode one frame from the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
/// the number of bytes it occupied.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let raw_opcode = buf[0] & 0x0F;
    let opcode = OpCode::from_u8(raw_opcode).ok_or(FrameError::UnknownOpcode(raw_opcode))?;

    let masked = buf[1] & 0x80 != 0;
    let mut cursor = 2usize;
    let len = match buf[1] & 0x7F {
        126 => {
            if buf.len() < cursor + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
            cursor += 2;
            len
        }
        127 => {
            if buf.len() < cursor + 8 {
                return Ok(None);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[2..10]);
            cursor += 8;
            u64::from_be_bytes(bytes)
        }
        short => short as u64,
    };

    if len > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(len));
    }
    if opcode.is_control() && (!fin || len > MAX_CONTROL_PAYLOAD as u64) {
        return Err(FrameError::MalformedControl);
    }

    let mask = if masked {
        if buf.len() < cursor + 4 {
            return Ok(None);
        }
        let key = [buf[cursor], buf[cursor + 1], buf[cursor + 2], buf[cursor + 3]];
        cursor += 4;
        Some(key)
    } else {
        None
    };

    let len = len as usize;
    if buf.len() < cursor + len {
        return Ok(None);
    }

    let data = &buf[cursor..cursor + len];
    let payload = match mask {
        Some(key) => data.iter().enumerate().map(|(i, b)| b ^ key[i % 4]).collect(),
        None => data.to_vec(),
    };

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        cursor + len,
    )))
}
