//! Modulo-10 sequence arithmetic.
//!
//! Data frames within a session are numbered `0, 1, …, 9, 0, …`.  Handshake
//! frames carry the distinguished [`Seq::Unsequenced`] marker instead.  With
//! a single frame outstanding, a modulus of 10 is more than enough to tell
//! the current frame from its predecessor.

/// Number of distinct sequence values in a session.
pub const MODULUS: u8 = 10;

/// Byte used on the wire for [`Seq::Unsequenced`].
pub const UNSEQUENCED_MARKER: u8 = b'/';

/// A frame's sequence marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Seq {
    /// Handshake frames, and the requester's "nothing completed yet" state.
    Unsequenced,
    /// A data-frame ordinal in `0..MODULUS`.
    Num(u8),
}

impl Seq {
    /// Sequence value for ordinal `n`, reduced modulo [`MODULUS`].
    pub fn num(n: u64) -> Self {
        Self::Num((n % u64::from(MODULUS)) as u8)
    }

    /// The next sequence value.  The first numbered frame after the
    /// unsequenced handshake is `0`.
    pub fn advance(self) -> Self {
        match self {
            Self::Unsequenced => Self::Num(0),
            Self::Num(n) => Self::Num((n % MODULUS + 1) % MODULUS),
        }
    }

    /// `true` iff `candidate` is the value immediately before `self`,
    /// i.e. `candidate == (self - 1) mod 10`.
    ///
    /// A peer re-acknowledging the predecessor has not received the frame
    /// currently outstanding.
    pub fn is_predecessor(self, candidate: Seq) -> bool {
        match (self, candidate) {
            (Self::Num(current), Self::Num(c)) => {
                c % MODULUS == (current % MODULUS + MODULUS - 1) % MODULUS
            }
            _ => false,
        }
    }

    /// Wire representation: `/` or an ASCII digit.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Unsequenced => UNSEQUENCED_MARKER,
            Self::Num(n) => b'0' + n % MODULUS,
        }
    }

    /// Parse the wire representation; `None` for anything else.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            UNSEQUENCED_MARKER => Some(Self::Unsequenced),
            b'0'..=b'9' => Some(Self::Num(b - b'0')),
            _ => None,
        }
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", char::from(self.to_byte()))
    }
}
