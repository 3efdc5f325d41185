//! Provider-side stop-and-wait send state.
//!
//! [`Sender`] slices the source bytes into frames, numbers them, and tracks
//! the single in-flight frame.  It does **not** touch the socket; the
//! provider session calls these methods and owns the send/poll loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** frame is in flight at any moment (`unacked`).
//! - A new frame may only be built once `unacked` is `None`.
//! - ACK for the in-flight sequence: advance sequence and read offset.
//! - ACK for the predecessor: the peer never got the in-flight frame;
//!   resend it unchanged.

use std::sync::Arc;

use crate::frame::{EndpointId, Frame, FrameError};
use crate::seq::Seq;

/// The frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub seq: Seq,
    /// Clean encoded frame, before any fault injection.
    pub bytes: Vec<u8>,
    /// How many times this frame has been transmitted (1 = first send).
    pub tx_count: u32,
}

/// What an acknowledgement meant for the in-flight frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The in-flight frame was delivered.
    Confirmed,
    /// Re-acknowledgement of the previous frame; resend the current one.
    Duplicate,
    /// Nothing in flight, or an acknowledgement for some other sequence.
    Ignored,
}

/// Stop-and-wait send-side state for one session.
#[derive(Debug)]
pub struct Sender {
    data: Arc<[u8]>,
    chunk_size: usize,
    /// Start of the unsent slice of `data`.
    offset: usize,
    /// Sequence number of the next frame to build.
    pub next_seq: Seq,
    sent_frames: u64,
    total_frames: u64,
    unacked: Option<InFlight>,
}

impl Sender {
    /// Panics if `chunk_size` is zero; configuration validation rules that out.
    pub fn new(data: Arc<[u8]>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        let total_frames = total_frames(data.len() as u64, chunk_size as u64);
        Self {
            data,
            chunk_size,
            offset: 0,
            next_seq: Seq::Num(0),
            sent_frames: 0,
            total_frames,
            unacked: None,
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn sent_frames(&self) -> u64 {
        self.sent_frames
    }

    pub fn is_complete(&self) -> bool {
        self.sent_frames >= self.total_frames
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.unacked.as_ref()
    }

    /// Build the frame for the unsent slice and place it in flight.
    ///
    /// Returns the clean encoded bytes.
    pub fn build_next(&mut self, dest: EndpointId, src: EndpointId) -> Result<&[u8], FrameError> {
        debug_assert!(
            self.unacked.is_none(),
            "build_next called while a frame is already in flight"
        );
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let payload = self.data[self.offset..end].to_vec();
        let bytes = Frame::new(dest, src, self.next_seq, payload).encode()?;

        let entry = self.unacked.insert(InFlight {
            seq: self.next_seq,
            bytes,
            tx_count: 1,
        });
        Ok(&entry.bytes)
    }

    /// Process the sequence named by an intact acknowledgement.
    pub fn on_ack(&mut self, acked: Seq) -> AckOutcome {
        let Some(entry) = &self.unacked else {
            return AckOutcome::Ignored;
        };
        if acked == entry.seq {
            self.next_seq = self.next_seq.advance();
            self.offset += self.chunk_size;
            self.sent_frames += 1;
            self.unacked = None;
            AckOutcome::Confirmed
        } else if entry.seq.is_predecessor(acked) {
            AckOutcome::Duplicate
        } else {
            AckOutcome::Ignored
        }
    }

    /// Record one more transmission of the in-flight frame.
    pub fn on_retransmit(&mut self) {
        if let Some(e) = self.unacked.as_mut() {
            e.tx_count += 1;
        }
    }

    /// Times the in-flight frame has been sent, or `0` when idle.
    pub fn retransmit_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }
}

/// `ceil(size / chunk_size)`.
pub fn total_frames(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size)
}
