//! Requester-side reassembly state.
//!
//! The [`Receiver`] handles everything between a raw datagram arriving and
//! the reassembled file bytes:
//! - Running the integrity gate; corrupted frames never reach the buffer.
//! - Accepting only the next expected sequence number.
//! - Tracking the last completed sequence, which every outbound
//!   acknowledgement refers to.
//! - Counting corrupted frames and consecutive silent polls.
//!
//! The [`Receiver`] does **not** send acknowledgements itself; it returns
//! the sequence the requester should acknowledge.

use crate::frame::Frame;
use crate::seq::Seq;

/// Result of feeding one datagram to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// In-order frame appended; acknowledge `ack`.
    Accepted { ack: Seq },
    /// Integrity check failed (or frame too long); re-acknowledge `ack` to
    /// request the same frame again.
    Corrupted { ack: Seq },
    /// Intact frame with some other sequence, typically a duplicate.
    Unexpected { seq: Seq },
}

/// Receive-side state for one transfer.
#[derive(Debug)]
pub struct Receiver {
    /// Sequence of the last frame appended; `Unsequenced` before the first.
    last_completed: Seq,
    buffer: Vec<u8>,
    received_frames: u64,
    total_frames: u64,
    /// Negotiated frame size; longer datagrams are treated as corrupted.
    frame_size: usize,
    corrupted_frames: u64,
    /// Consecutive silent polls since the last in-order frame.
    silent_polls: u32,
    /// Silent polls over the whole transfer.
    timeouts: u64,
}

impl Receiver {
    pub fn new(total_frames: u64, frame_size: usize) -> Self {
        Self {
            last_completed: Seq::Unsequenced,
            buffer: Vec::new(),
            received_frames: 0,
            total_frames,
            frame_size,
            corrupted_frames: 0,
            silent_polls: 0,
            timeouts: 0,
        }
    }

    /// The sequence the next data frame must carry.
    pub fn expected(&self) -> Seq {
        self.last_completed.advance()
    }

    /// The sequence every acknowledgement currently refers to.
    pub fn ack_seq(&self) -> Seq {
        self.last_completed
    }

    pub fn is_complete(&self) -> bool {
        self.received_frames >= self.total_frames
    }

    pub fn received_frames(&self) -> u64 {
        self.received_frames
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn corrupted_frames(&self) -> u64 {
        self.corrupted_frames
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn received_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Process one datagram from the provider.
    pub fn on_datagram(&mut self, bytes: &[u8]) -> Delivery {
        let frame = match Frame::decode(bytes) {
            Ok(f) if bytes.len() <= self.frame_size => f,
            _ => {
                self.corrupted_frames += 1;
                return Delivery::Corrupted {
                    ack: self.last_completed,
                };
            }
        };

        if frame.seq != self.expected() {
            return Delivery::Unexpected { seq: frame.seq };
        }

        self.buffer.extend_from_slice(&frame.payload);
        self.last_completed = frame.seq;
        self.received_frames += 1;
        self.silent_polls = 0;
        Delivery::Accepted {
            ack: self.last_completed,
        }
    }

    /// Record a poll that saw no datagram; returns the consecutive count.
    pub fn on_silence(&mut self) -> u32 {
        self.silent_polls += 1;
        self.timeouts += 1;
        self.silent_polls
    }

    /// Hand over the reassembled bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}
