//! Fault injection for exercising the ARQ machinery.
//!
//! The provider passes every outbound data frame through a
//! [`FaultInjector`] before it reaches the socket.  Corruption flips exactly
//! one bit inside the payload region, so:
//!
//! - the frame keeps its length and its header stays parseable, and
//! - the CRC-32 trailer always detects it (CRC-32 catches every single-bit
//!   error).
//!
//! | Injector             | Behaviour                                        |
//! |----------------------|--------------------------------------------------|
//! | [`NoFaults`]         | Transparent pass-through.                        |
//! | [`RandomCorruption`] | Corrupt with probability `percent / 100`.        |
//! | [`FaultSchedule`]    | Corrupt according to a fixed per-send plan.      |

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::{HEADER_LEN, TRAILER_LEN};

/// A capability that may corrupt an encoded frame before it is sent.
pub trait FaultInjector {
    /// Return `frame` unchanged, or a bit-altered copy of equal length.
    fn maybe_corrupt(&mut self, frame: &[u8]) -> Vec<u8>;
}

impl<F: FaultInjector + ?Sized> FaultInjector for Box<F> {
    fn maybe_corrupt(&mut self, frame: &[u8]) -> Vec<u8> {
        (**self).maybe_corrupt(frame)
    }
}

/// Flip bit `bit` (counted modulo the region size) of the payload region.
///
/// Buffers too short to have a payload region are returned unchanged.
pub fn flip_payload_bit(frame: &[u8], bit: usize) -> Vec<u8> {
    let mut out = frame.to_vec();
    let region = frame.len().saturating_sub(HEADER_LEN + TRAILER_LEN);
    if region == 0 {
        return out;
    }
    let bit = bit % (region * 8);
    out[HEADER_LEN + bit / 8] ^= 1 << (bit % 8);
    out
}

fn payload_bits(frame: &[u8]) -> usize {
    frame.len().saturating_sub(HEADER_LEN + TRAILER_LEN) * 8
}

// ---------------------------------------------------------------------------
// NoFaults
// ---------------------------------------------------------------------------

/// Never corrupts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn maybe_corrupt(&mut self, frame: &[u8]) -> Vec<u8> {
        frame.to_vec()
    }
}

// ---------------------------------------------------------------------------
// RandomCorruption
// ---------------------------------------------------------------------------

/// Corrupts each frame independently with probability `percent / 100`.
#[derive(Debug)]
pub struct RandomCorruption {
    percent: u8,
    rng: StdRng,
}

impl RandomCorruption {
    /// Entropy-seeded injector; `percent` is clamped to `0..=100`.
    pub fn new(percent: u8) -> Self {
        Self::with_rng(percent, StdRng::from_os_rng())
    }

    /// Reproducible injector for tests.
    pub fn seeded(percent: u8, seed: u64) -> Self {
        Self::with_rng(percent, StdRng::seed_from_u64(seed))
    }

    fn with_rng(percent: u8, rng: StdRng) -> Self {
        Self {
            percent: percent.min(100),
            rng,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }
}

impl FaultInjector for RandomCorruption {
    fn maybe_corrupt(&mut self, frame: &[u8]) -> Vec<u8> {
        let bits = payload_bits(frame);
        if bits == 0 || self.percent == 0 {
            return frame.to_vec();
        }
        if self.rng.random_range(0..100u8) >= self.percent {
            return frame.to_vec();
        }
        let bit = self.rng.random_range(0..bits);
        flip_payload_bit(frame, bit)
    }
}

// ---------------------------------------------------------------------------
// FaultSchedule
// ---------------------------------------------------------------------------

/// Deterministic plan: the n-th call corrupts iff the n-th entry is `true`.
/// Once the plan is exhausted every frame passes through untouched.
#[derive(Debug, Clone, Default)]
pub struct FaultSchedule {
    plan: VecDeque<bool>,
    injected: usize,
}

impl FaultSchedule {
    pub fn new(plan: impl IntoIterator<Item = bool>) -> Self {
        Self {
            plan: plan.into_iter().collect(),
            injected: 0,
        }
    }

    /// Corrupt the first `n` frames, then pass everything through.
    pub fn first(n: usize) -> Self {
        Self::new(std::iter::repeat(true).take(n))
    }

    /// How many frames this schedule has corrupted so far.
    pub fn injected(&self) -> usize {
        self.injected
    }
}

impl FaultInjector for FaultSchedule {
    fn maybe_corrupt(&mut self, frame: &[u8]) -> Vec<u8> {
        if self.plan.pop_front().unwrap_or(false) && payload_bits(frame) > 0 {
            self.injected += 1;
            // Vary the flipped bit so different payload bytes get hit.
            return flip_payload_bit(frame, self.injected * 13);
        }
        frame.to_vec()
    }
}
