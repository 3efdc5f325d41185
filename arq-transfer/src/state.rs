//! Endpoint finite-state machine (FSM) types.
//!
//! This module defines every state the [`crate::requester::Requester`] and
//! the provider's per-client session can occupy.  Transitions are driven by
//! [`crate::requester`] and [`crate::provider`]; keeping the types here lets
//! both sides log transitions uniformly.

use std::fmt;

/// Requester states.
///
/// ```text
/// REQUESTING ──accepted──▶ CONFIGURING ──size──▶ AWAITING_TOTAL ──count──▶ AWAITING_NAME
///     │                        │                                                │
///     ▼                        ▼                                             name
///   FAILED ◀────────────── RECEIVING ◀────────ready sent──────── READY ◀────────┘
///                              │
///                              ▼
///                             DONE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequesterState {
    /// Request sent; waiting for acceptance.
    #[default]
    Requesting,
    /// Waiting for the provider identifier and negotiated frame size.
    Configuring,
    /// Waiting for the total frame count.
    AwaitingTotal,
    /// Waiting for the filename.
    AwaitingName,
    /// Metadata recorded; about to signal readiness.
    Ready,
    /// Stop-and-wait receive loop.
    Receiving,
    /// Every frame received.
    Done,
    /// Fatal outcome; nothing is persisted.
    Failed,
}

/// States of one provider session.
///
/// ```text
/// ACCEPTING ──request──▶ CONFIGURING ──OK──▶ META ──▶ SENDING ──ready──▶ STREAMING ──▶ COMPLETE
///     ▲                       │                          │                   │
///     └───────────────────────┴────── ABORTED ◀──────────┴───────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderState {
    /// Blocking on the next request frame.
    #[default]
    Accepting,
    /// Accept + frame size sent; waiting for `OK`.
    Configuring,
    /// Announcing total frame count and filename.
    Meta,
    /// Waiting for `ready`.
    Sending,
    /// Stop-and-wait send loop.
    Streaming,
    /// All frames confirmed.
    Complete,
    /// Session abandoned; back to accepting.
    Aborted,
}

impl fmt::Display for RequesterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requesting => "REQUESTING",
            Self::Configuring => "CONFIGURING",
            Self::AwaitingTotal => "AWAITING_TOTAL",
            Self::AwaitingName => "AWAITING_NAME",
            Self::Ready => "READY",
            Self::Receiving => "RECEIVING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepting => "ACCEPTING",
            Self::Configuring => "CONFIGURING",
            Self::Meta => "META",
            Self::Sending => "SENDING",
            Self::Streaming => "STREAMING",
            Self::Complete => "COMPLETE",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}
