//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between requester and provider is a [`Frame`].
//! This module is responsible for:
//! - Defining the fixed-offset on-wire layout (identifiers, sequence, payload).
//! - Computing and verifying the trailing integrity code.
//! - Serialising a [`Frame`] into bytes and parsing bytes back, rejecting
//!   anything undersized or corrupted before a single field is trusted.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All fields are ASCII text except the payload, which is opaque bytes.
//!
//! ```text
//!  0            12           24  25                      len-10      len
//! +------------+------------+---+-----------------------+-----------+
//! | dest id    | source id  |seq| payload (1..=8128)    | CRC-32    |
//! | 12 bytes   | 12 bytes   | 1 |                       | 10 digits |
//! +------------+------------+---+-----------------------+-----------+
//! ```
//!
//! The integrity code is the CRC-32 of every preceding byte, written as a
//! zero-padded ten-digit decimal number.

use std::fmt;

use rand::Rng;
use thiserror::Error;

use crate::seq::Seq;

/// Width of an endpoint identifier on the wire.
pub const ID_LEN: usize = 12;

/// Bytes preceding the payload: dest(12) + source(12) + seq(1).
pub const HEADER_LEN: usize = 25;

/// Width of the integrity code trailer.
pub const TRAILER_LEN: usize = 10;

/// Fixed per-frame overhead; the negotiated frame size is this plus the chunk size.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 8128;

/// Smallest well-formed frame (one payload byte).
pub const MIN_FRAME_LEN: usize = FRAME_OVERHEAD + 1;

/// Largest well-formed frame.
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + MAX_PAYLOAD;

// Byte offsets of each field within the serialised frame.
const OFF_DEST: usize = 0;
const OFF_SRC: usize = 12;
const OFF_SEQ: usize = 24;
const OFF_PAYLOAD: usize = HEADER_LEN;

/// Command tokens carried as payloads during the handshake and transfer.
pub mod tokens {
    /// Requester asks the provider for the file.
    pub const REQUEST_DATA: &[u8] = b"request_data";
    /// Provider accepts a request.
    pub const REQUEST_ACCEPTED: &[u8] = b"request_accepted";
    /// Requester recorded the negotiated frame size.
    pub const OK: &[u8] = b"OK";
    /// Requester recorded the metadata and waits for data frames.
    pub const READY: &[u8] = b"ready";
    /// Prefix of an acknowledgement; followed by one sequence character.
    pub const ACK_PREFIX: &[u8] = b"ACK";
}

// ---------------------------------------------------------------------------
// Endpoint identifiers
// ---------------------------------------------------------------------------

/// Fixed-width 12-character endpoint identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId([u8; ID_LEN]);

impl EndpointId {
    /// Build an identifier from text, left-padding with `0` or truncating
    /// to [`ID_LEN`] characters.
    pub fn new(id: &str) -> Self {
        let bytes = id.as_bytes();
        let mut out = [b'0'; ID_LEN];
        if bytes.len() >= ID_LEN {
            out.copy_from_slice(&bytes[..ID_LEN]);
        } else {
            out[ID_LEN - bytes.len()..].copy_from_slice(bytes);
        }
        Self(out)
    }

    /// The all-zero identifier used before a peer's identifier is known.
    pub fn unknown() -> Self {
        Self([b'0'; ID_LEN])
    }

    /// A random 48-bit identifier rendered as 12 lowercase hex digits.
    pub fn random() -> Self {
        let value: u64 = rand::rng().random_range(0..1u64 << 48);
        Self::new(&format!("{value:012x}"))
    }

    /// Wrap the raw identifier bytes taken from a received frame.
    pub fn from_wire(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({self})")
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A complete protocol frame: addressing, sequence marker, payload.
///
/// The integrity code is not stored; [`Frame::encode`] computes it and
/// [`Frame::decode`] verifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dest: EndpointId,
    pub src: EndpointId,
    pub seq: Seq,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(dest: EndpointId, src: EndpointId, seq: Seq, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            dest,
            src,
            seq,
            payload: payload.into(),
        }
    }

    /// Unsequenced handshake/control frame.
    pub fn control(dest: EndpointId, src: EndpointId, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(dest, src, Seq::Unsequenced, payload)
    }

    /// Acknowledgement for `seq`: the marker goes in the sequence field and
    /// after the `ACK` prefix.
    pub fn ack(dest: EndpointId, src: EndpointId, seq: Seq) -> Self {
        let mut payload = tokens::ACK_PREFIX.to_vec();
        payload.push(seq.to_byte());
        Self::new(dest, src, seq, payload)
    }

    /// The sequence acknowledged by this frame, if its payload is `ACK<x>`.
    pub fn acked_seq(&self) -> Option<Seq> {
        match self.payload.strip_prefix(tokens::ACK_PREFIX) {
            Some([marker]) => Seq::from_byte(*marker),
            _ => None,
        }
    }

    /// `true` when the payload is exactly `token`.
    pub fn is(&self, token: &[u8]) -> bool {
        self.payload == token
    }

    /// Payload rendered as text for logs and numeric/filename parsing.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialise this frame, appending the integrity code.
    ///
    /// Fails if the payload is empty or larger than [`MAX_PAYLOAD`].
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let len = self.payload.len();
        if len == 0 {
            return Err(FrameError::EmptyPayload);
        }
        if len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge { len });
        }

        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + len);
        buf.extend_from_slice(self.dest.as_bytes());
        buf.extend_from_slice(self.src.as_bytes());
        buf.push(self.seq.to_byte());
        buf.extend_from_slice(&self.payload);

        let code = integrity_code(&buf);
        buf.extend_from_slice(&code);
        Ok(buf)
    }

    /// Parse a frame, verifying the integrity code before trusting any field.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let raw = RawFrame::split(buf)?;
        let expected = integrity_code(&buf[..buf.len() - TRAILER_LEN]);
        if *raw.trailer != expected {
            return Err(FrameError::IntegrityMismatch);
        }

        let seq = Seq::from_byte(raw.seq).ok_or(FrameError::BadSequence(raw.seq))?;
        Ok(Self {
            dest: EndpointId::from_wire(*raw.dest),
            src: EndpointId::from_wire(*raw.src),
            seq,
            payload: raw.payload.to_vec(),
        })
    }
}

/// Borrowed view of a frame's fields, sliced at the fixed offsets and not
/// yet verified.
#[derive(Debug, PartialEq, Eq)]
pub struct RawFrame<'a> {
    pub dest: &'a [u8; ID_LEN],
    pub src: &'a [u8; ID_LEN],
    pub seq: u8,
    pub payload: &'a [u8],
    pub trailer: &'a [u8; TRAILER_LEN],
}

impl<'a> RawFrame<'a> {
    /// Slice `buf` at positions 0–12, 12–24, 24–25, 25–(len-10), (len-10)–len.
    pub fn split(buf: &'a [u8]) -> Result<Self, FrameError> {
        if buf.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort { len: buf.len() });
        }
        let end = buf.len() - TRAILER_LEN;
        Ok(Self {
            dest: fixed(&buf[OFF_DEST..OFF_SRC])?,
            src: fixed(&buf[OFF_SRC..OFF_SEQ])?,
            seq: buf[OFF_SEQ],
            payload: &buf[OFF_PAYLOAD..end],
            trailer: fixed(&buf[end..])?,
        })
    }
}

fn fixed<const N: usize>(slice: &[u8]) -> Result<&[u8; N], FrameError> {
    slice
        .try_into()
        .map_err(|_| FrameError::TooShort { len: slice.len() })
}

/// `true` iff `buf` is long enough and its trailer matches the integrity
/// code recomputed over everything before it. Never panics.
pub fn verify(buf: &[u8]) -> bool {
    match RawFrame::split(buf) {
        Ok(raw) => *raw.trailer == integrity_code(&buf[..buf.len() - TRAILER_LEN]),
        Err(_) => false,
    }
}

/// CRC-32 of `data` as a zero-padded ten-digit decimal string.
pub fn integrity_code(data: &[u8]) -> [u8; TRAILER_LEN] {
    let crc = crc32fast::hash(data);
    let mut out = [b'0'; TRAILER_LEN];
    let digits = crc.to_string();
    out[TRAILER_LEN - digits.len()..].copy_from_slice(digits.as_bytes());
    out
}

/// Errors that can arise when building or parsing a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes is shorter than the minimum frame length")]
    TooShort { len: usize },
    #[error("frame payload must not be empty")]
    EmptyPayload,
    #[error("payload of {len} bytes exceeds the maximum frame payload")]
    PayloadTooLarge { len: usize },
    #[error("integrity code mismatch")]
    IntegrityMismatch,
    #[error("invalid sequence marker {0:#04x}")]
    BadSequence(u8),
}
