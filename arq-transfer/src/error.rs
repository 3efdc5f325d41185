//! Session outcome errors.
//!
//! Corruption and desynchronisation during streaming are absorbed by the
//! ARQ loops and never show up here.  What remains is fatal: to the whole
//! requester process, or to the provider's current session only.

use thiserror::Error;

use crate::frame::FrameError;
use crate::socket::SocketError;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The provider answered the request with something other than acceptance.
    #[error("request was not accepted (got {payload:?})")]
    Rejected { payload: String },

    /// A handshake or metadata frame failed its integrity check.  These
    /// frames are never retransmitted.
    #[error("corrupted frame while waiting for {stage}")]
    Corrupted { stage: &'static str },

    /// An intact frame carried the wrong token for this point of the handshake.
    #[error("expected {stage}, got {payload:?}")]
    UnexpectedPayload { stage: &'static str, payload: String },

    /// Frame size, frame count or filename could not be used.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A provider was built with a chunk size no frame can carry.
    #[error("chunk size {chunk_size} must be between 1 and 8128 bytes")]
    InvalidChunkSize { chunk_size: usize },

    /// The failure budget ran out while waiting for the peer.
    #[error("peer stopped responding after {attempts} attempts")]
    NoResponse { attempts: u32 },

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
