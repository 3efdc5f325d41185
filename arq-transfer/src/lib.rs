//! `arq-transfer` — reliable file transfer over UDP with stop-and-wait ARQ.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   request / OK / ready / ACKn   ┌────────────┐
//!  │ Requester  │────────────────────────────────▶│  Provider  │
//!  │ (Receiver) │◀────────────────────────────────│  (Sender)  │
//!  └─────┬──────┘  accept / size / count / name / └─────┬──────┘
//!        │         numbered data frames               │ FaultInjector
//!  ┌─────▼──────────────────────────────────────────────▼──────┐
//!  │                 Frame codec + CRC-32 trailer               │
//!  └─────┬──────────────────────────────────────────────────────┘
//!        │ raw UDP datagrams
//!  ┌─────▼──────┐
//!  │   Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]     — wire format, endpoint identifiers, integrity code
//! - [`seq`]       — modulo-10 sequence arithmetic
//! - [`fault`]     — pluggable frame corruption for exercising the protocol
//! - [`socket`]    — async UDP socket with bounded readiness polls
//! - [`config`]    — validated endpoint configuration and ARQ timings
//! - [`state`]     — finite-state-machine types for both endpoints
//! - [`sender`]    — provider-side stop-and-wait send state
//! - [`receiver`]  — requester-side reassembly state
//! - [`requester`] — requester state machine and persistence
//! - [`provider`]  — provider accept loop and per-client sessions
//! - [`progress`]  — progress reporting collaborator
//! - [`error`]     — session outcome errors

pub mod config;
pub mod error;
pub mod fault;
pub mod frame;
pub mod progress;
pub mod provider;
pub mod receiver;
pub mod requester;
pub mod sender;
pub mod seq;
pub mod socket;
pub mod state;

pub use config::{ArqTimings, ProviderConfig, RequesterConfig};
pub use error::TransferError;
pub use frame::{EndpointId, Frame, FrameError};
pub use provider::{Provider, SessionReport, Source};
pub use requester::{Requester, TransferReport};
pub use seq::Seq;
