//! Legacy Minecraft wire codec.
//!
//! Only the three packets the proxy has to understand before it starts
//! relaying are modelled here:
//! - `0xFE` server list ping (no payload)
//! - `0x02` handshake (one string field)
//! - `0xFF` disconnect / kick (one string field, server to client)
//!
//! Strings are framed as:
//! - 2 bytes big-endian character count
//! - that many UCS-2 code units, 2 bytes each, big-endian

use bytes::BufMut;
use thiserror::Error;

/// Server list ping.
pub const TAG_STATUS_QUERY: u8 = 0xFE;

/// Handshake carrying the routing string.
pub const TAG_HANDSHAKE: u8 = 0x02;

/// Disconnect with a reason string.
pub const TAG_DISCONNECT: u8 = 0xFF;

/// Substitute for characters that do not fit in a single UCS-2 unit.
pub const PLACEHOLDER: char = '?';

/// Length of the string length prefix.
const LENGTH_PREFIX: usize = 2;

/// Codec failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Not enough bytes buffered yet. Read more and try again.
    #[error("incomplete frame")]
    IncompleteFrame,

    /// Leading byte is not a packet the proxy accepts before binding.
    #[error("unexpected packet 0x{0:02x}")]
    UnexpectedPacket(u8),
}

/// Encode a string as a length-prefixed UCS-2 field.
///
/// Characters outside the Basic Multilingual Plane become [`PLACEHOLDER`].
/// Input longer than `u16::MAX` characters is truncated.
pub fn encode_string(s: &str) -> Vec<u8> {
    let units: Vec<u16> = s
        .chars()
        .take(u16::MAX as usize)
        .map(|c| u16::try_from(u32::from(c)).unwrap_or(PLACEHOLDER as u16))
        .collect();

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + units.len() * 2);
    buf.put_u16(units.len() as u16);
    for unit in units {
        buf.put_u16(unit);
    }
    buf
}

/// Decode a length-prefixed UCS-2 field from the front of `buf`.
///
/// Returns the string and the number of bytes consumed (prefix included).
/// Lone surrogate units decode to [`PLACEHOLDER`].
pub fn decode_string(buf: &[u8]) -> Result<(String, usize), CodecError> {
    let len = declared_len(buf)?;
    let consumed = LENGTH_PREFIX + len * 2;
    if buf.len() < consumed {
        return Err(CodecError::IncompleteFrame);
    }

    let s = buf[LENGTH_PREFIX..consumed]
        .chunks_exact(2)
        .map(|pair| {
            let unit = u16::from_be_bytes([pair[0], pair[1]]);
            char::from_u32(u32::from(unit)).unwrap_or(PLACEHOLDER)
        })
        .collect();

    Ok((s, consumed))
}

/// Character count announced by a string field's prefix.
fn declared_len(buf: &[u8]) -> Result<usize, CodecError> {
    match buf {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo]) as usize),
        _ => Err(CodecError::IncompleteFrame),
    }
}

/// Packets the proxy writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Handshake replayed to a backend.
    Handshake(String),
    /// Kick reason or server list response.
    Disconnect(String),
}

impl Packet {
    pub fn handshake(routing: impl Into<String>) -> Self {
        Self::Handshake(routing.into())
    }

    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self::Disconnect(reason.into())
    }

    pub fn tag(&self) -> u8 {
        match self {
            Self::Handshake(_) => TAG_HANDSHAKE,
            Self::Disconnect(_) => TAG_DISCONNECT,
        }
    }

    /// Serialize the packet: tag byte followed by its string field.
    pub fn encode(&self) -> Vec<u8> {
        let (Self::Handshake(s) | Self::Disconnect(s)) = self;
        let body = encode_string(s);
        let mut buf = Vec::with_capacity(1 + body.len());
        buf.put_u8(self.tag());
        buf.put_slice(&body);
        buf
    }
}

/// What a client opened its connection with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
    /// Server list ping.
    StatusQuery,
    /// Complete handshake. `consumed` covers the tag and the string field;
    /// anything after it belongs to the relayed stream.
    Handshake { routing: String, consumed: usize },
}

/// Classify the bytes a client has sent so far.
///
/// `Err(CodecError::IncompleteFrame)` means the buffer is a valid prefix and
/// more input is needed. The handshake body is never decoded before its
/// declared length is fully buffered.
pub fn sniff(buf: &[u8]) -> Result<Sniffed, CodecError> {
    let (&tag, rest) = buf.split_first().ok_or(CodecError::IncompleteFrame)?;

    match tag {
        TAG_STATUS_QUERY => Ok(Sniffed::StatusQuery),
        TAG_HANDSHAKE => {
            let (routing, consumed) = decode_string(rest)?;
            Ok(Sniffed::Handshake {
                routing,
                consumed: 1 + consumed,
            })
        }
        other => Err(CodecError::UnexpectedPacket(other)),
    }
}
