//! Provider endpoint: accept loop and per-client sessions.
//!
//! The provider serves one requester at a time.  [`Provider::serve`] blocks
//! on the next `request_data` frame, then runs that client's session to the
//! end before accepting again:
//!
//! ```text
//!  accept ──▶ CONFIGURING ──▶ META ──▶ SENDING ──▶ STREAMING ──▶ accept …
//!              accept+size    count    wait for    one frame in
//!              wait for OK    name     "ready"     flight at a time
//! ```
//!
//! A failed session is logged and abandoned; the accept loop carries on.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::time::Instant;

use crate::config::{ArqTimings, ProviderConfig, ACCEPT_BUFFER};
use crate::error::TransferError;
use crate::fault::{FaultInjector, RandomCorruption};
use crate::frame::{tokens, EndpointId, Frame, FRAME_OVERHEAD, MAX_PAYLOAD};
use crate::progress::{percent, Progress};
use crate::sender::{total_frames, AckOutcome, Sender};
use crate::socket::{Socket, SocketError};
use crate::state::ProviderState;

/// The file being served, held in memory as opaque bytes.
#[derive(Debug, Clone)]
pub struct Source {
    /// Name announced to requesters (final path component only).
    pub name: String,
    pub data: Arc<[u8]>,
}

impl Source {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read the whole file once.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        Ok(Self::new(name, data))
    }
}

/// A requester whose request has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Client {
    pub addr: SocketAddr,
    pub id: EndpointId,
}

/// Counters from one completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub peer: SocketAddr,
    pub frames: u64,
    pub bytes: usize,
    /// Resends of a frame already sent once, for any reason.
    pub retransmissions: u64,
    /// Predecessor acknowledgements that triggered an immediate resend.
    pub duplicate_acks: u64,
}

pub struct Provider<F = RandomCorruption> {
    socket: Socket,
    id: EndpointId,
    source: Source,
    chunk_size: usize,
    timings: ArqTimings,
    faults: F,
    state: ProviderState,
}

impl Provider<RandomCorruption> {
    /// Load the configured file and bind on all interfaces.
    pub async fn bind(config: &ProviderConfig) -> Result<Self, TransferError> {
        let source = Source::load(&config.file).await?;
        let socket = Socket::bind(config.bind_addr()).await?;
        let faults = RandomCorruption::new(config.error_rate);
        Ok(Self::new(socket, source, config.chunk_size, faults)?.with_timings(config.timings))
    }
}

impl<F: FaultInjector> Provider<F> {
    /// Fails unless `chunk_size` is in `1..=MAX_PAYLOAD`.
    pub fn new(
        socket: Socket,
        source: Source,
        chunk_size: usize,
        faults: F,
    ) -> Result<Self, TransferError> {
        if !(1..=MAX_PAYLOAD).contains(&chunk_size) {
            return Err(TransferError::InvalidChunkSize { chunk_size });
        }
        Ok(Self {
            socket,
            id: EndpointId::random(),
            source,
            chunk_size,
            timings: ArqTimings::default(),
            faults,
            state: ProviderState::default(),
        })
    }

    pub fn with_timings(mut self, timings: ArqTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    pub fn faults(&self) -> &F {
        &self.faults
    }

    /// Negotiated frame size announced to every requester.
    pub fn frame_size(&self) -> usize {
        FRAME_OVERHEAD + self.chunk_size
    }

    /// Accept and serve requesters forever, one at a time.
    ///
    /// Only a failure of the socket itself ends the loop.
    pub async fn serve<P: Progress>(&mut self, mut progress: P) -> Result<(), SocketError> {
        loop {
            log::info!("Waiting for incoming requests...");
            let client = self.accept().await?;
            match self.session(client, &mut progress).await {
                Ok(report) => log::info!(
                    "Transmission to {} completed: {} frames, {} bytes, {} retransmissions.",
                    report.peer,
                    report.frames,
                    report.bytes,
                    report.retransmissions
                ),
                Err(TransferError::NoResponse { .. }) => {
                    log::warn!("Connection with client {} timed out.", client.addr)
                }
                Err(e) => log::warn!("Session with {} ended: {e}", client.addr),
            }
        }
    }

    /// Block until an intact `request_data` frame arrives.
    pub async fn accept(&mut self) -> Result<Client, SocketError> {
        self.transition(ProviderState::Accepting);
        loop {
            let datagram = self.socket.recv_from(ACCEPT_BUFFER).await?;
            match datagram.frame() {
                Ok(frame) if frame.is(tokens::REQUEST_DATA) => {
                    log::info!("Received request from {}", datagram.from);
                    return Ok(Client {
                        addr: datagram.from,
                        id: frame.src,
                    });
                }
                Ok(frame) => log::debug!(
                    "[provider] ignoring {:?} from {} while accepting",
                    frame.payload_text(),
                    datagram.from
                ),
                Err(e) => log::warn!("Failed to start transmission with {}: {e}", datagram.from),
            }
        }
    }

    /// Run one client's session to completion or failure.
    pub async fn session<P: Progress>(
        &mut self,
        client: Client,
        mut progress: P,
    ) -> Result<SessionReport, TransferError> {
        let result = self.run_session(&client, &mut progress).await;
        let end = match result {
            Ok(_) => ProviderState::Complete,
            Err(_) => ProviderState::Aborted,
        };
        self.transition(end);
        result
    }

    async fn run_session<P: Progress>(
        &mut self,
        client: &Client,
        progress: &mut P,
    ) -> Result<SessionReport, TransferError> {
        self.configure(client).await?;
        self.announce(client).await?;
        self.await_ready(client).await?;
        log::info!("Starting transmission...");
        let result = self.stream(client, progress).await;
        progress.finish();
        result
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    async fn configure(&mut self, client: &Client) -> Result<(), TransferError> {
        self.transition(ProviderState::Configuring);
        self.send_control(client, tokens::REQUEST_ACCEPTED).await?;
        self.send_control(client, self.frame_size().to_string()).await?;

        let reply = self.await_reply(client, "OK").await?;
        expect_token(&reply, tokens::OK, "OK")
    }

    async fn announce(&mut self, client: &Client) -> Result<(), TransferError> {
        self.transition(ProviderState::Meta);
        let total = total_frames(self.source.data.len() as u64, self.chunk_size as u64);
        self.send_control(client, total.to_string()).await?;
        self.send_control(client, self.source.name.clone()).await?;
        Ok(())
    }

    async fn await_ready(&mut self, client: &Client) -> Result<(), TransferError> {
        self.transition(ProviderState::Sending);
        let reply = self.await_reply(client, "ready").await?;
        expect_token(&reply, tokens::READY, "ready")
    }

    async fn send_control(
        &self,
        client: &Client,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), TransferError> {
        let frame = Frame::control(client.id, self.id, payload);
        self.socket.send_frame(&frame, client.addr).await?;
        Ok(())
    }

    /// Wait for one intact frame from `client`, bounded by the failure budget.
    async fn await_reply(&self, client: &Client, stage: &'static str) -> Result<Frame, TransferError> {
        let mut silent = 0u32;
        loop {
            match self.socket.poll_recv(self.timings.poll_timeout).await? {
                None => {
                    silent += 1;
                    if silent > self.timings.max_failures {
                        return Err(TransferError::NoResponse { attempts: silent });
                    }
                }
                Some(d) if d.from != client.addr => {
                    log::debug!("[provider] ignoring datagram from {} mid-session", d.from);
                }
                Some(d) => {
                    return d.frame().map_err(|_| {
                        log::warn!("Failed to start transmission: corrupted {stage}.");
                        TransferError::Corrupted { stage }
                    })
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stop-and-wait streaming
    // -----------------------------------------------------------------------

    async fn stream<P: Progress>(
        &mut self,
        client: &Client,
        progress: &mut P,
    ) -> Result<SessionReport, TransferError> {
        self.transition(ProviderState::Streaming);
        let mut sender = Sender::new(Arc::clone(&self.source.data), self.chunk_size);
        let total = sender.total_frames();
        let mut report = SessionReport {
            peer: client.addr,
            frames: 0,
            bytes: self.source.data.len(),
            retransmissions: 0,
            duplicate_acks: 0,
        };
        let mut failures = 0u32;
        progress.start(
            &format!("Sending '{}' to {}", self.source.name, client.addr),
            total,
        );

        while !sender.is_complete() {
            let clean = sender.build_next(client.id, self.id)?.to_vec();

            'attempt: loop {
                let wire = self.faults.maybe_corrupt(&clean);
                let sent = match self.socket.send_to(&wire, client.addr).await {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Connection lost ({e}). Attempting to reestablish.");
                        false
                    }
                };

                // One attempt: a fixed window after the send.  Replies that do
                // not confirm the frame never extend it.
                let deadline = Instant::now() + self.timings.poll_timeout;
                let mut heard = false;
                while let Some(datagram) = self.socket.recv_until(deadline).await? {
                    if datagram.from != client.addr {
                        continue;
                    }
                    heard = true;
                    failures = 0;

                    let Ok(reply) = datagram.frame() else {
                        log::debug!("[provider] corrupted reply discarded");
                        continue;
                    };
                    let Some(acked) = reply.acked_seq() else {
                        continue;
                    };
                    match sender.on_ack(acked) {
                        AckOutcome::Confirmed => {
                            report.frames = sender.sent_frames();
                            progress.advance(report.frames, total);
                            log::debug!(
                                "[provider] ← ACK{acked} ({:.2}%)",
                                percent(report.frames, total)
                            );
                            break 'attempt;
                        }
                        AckOutcome::Duplicate => {
                            log::debug!("[provider] ← ACK{acked} duplicate; resending current frame");
                            report.duplicate_acks += 1;
                            report.retransmissions += 1;
                            sender.on_retransmit();
                            if let Err(e) = self.socket.send_to(&clean, client.addr).await {
                                log::warn!("Connection lost ({e}). Attempting to reestablish.");
                            }
                        }
                        AckOutcome::Ignored => {
                            log::debug!("[provider] ← ACK{acked} ignored");
                        }
                    }
                }

                if !sent || !heard {
                    failures += 1;
                    if failures > self.timings.max_failures {
                        return Err(TransferError::NoResponse { attempts: failures });
                    }
                }
                report.retransmissions += 1;
                sender.on_retransmit();
                log::debug!(
                    "[provider] no confirmation; resending (attempt {})",
                    sender.retransmit_count()
                );
            }
        }

        log::info!("Transmission completed.");
        Ok(report)
    }

    fn transition(&mut self, next: ProviderState) {
        if self.state != next {
            log::debug!("[provider] {} → {}", self.state, next);
            self.state = next;
        }
    }
}

fn expect_token(frame: &Frame, token: &[u8], stage: &'static str) -> Result<(), TransferError> {
    if frame.is(token) {
        Ok(())
    } else {
        Err(TransferError::UnexpectedPayload {
            stage,
            payload: frame.payload_text(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::NoFaults;

    #[tokio::test]
    async fn source_load_reads_bytes_and_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.ppm");
        std::fs::write(&path, [0u8, 1, 2, 255]).unwrap();

        let source = Source::load(&path).await.unwrap();
        assert_eq!(source.name, "image.ppm");
        assert_eq!(&*source.data, &[0u8, 1, 2, 255]);
    }

    #[tokio::test]
    async fn source_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Source::load(&dir.path().join("nope")).await.is_err());
    }

    #[tokio::test]
    async fn chunk_size_must_fit_one_frame() {
        for chunk_size in [0, MAX_PAYLOAD + 1] {
            let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
            let result = Provider::new(socket, Source::new("a", vec![1u8; 4]), chunk_size, NoFaults);
            assert!(matches!(
                result,
                Err(TransferError::InvalidChunkSize { chunk_size: c }) if c == chunk_size
            ));
        }

        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let provider =
            Provider::new(socket, Source::new("a", vec![1u8; 4]), MAX_PAYLOAD, NoFaults).unwrap();
        assert_eq!(provider.frame_size(), FRAME_OVERHEAD + MAX_PAYLOAD);
    }

    #[test]
    fn unexpected_token_is_reported() {
        let frame = Frame::control(EndpointId::unknown(), EndpointId::unknown(), b"nope".to_vec());
        assert!(expect_token(&frame, tokens::OK, "OK").is_err());
        let ok = Frame::control(EndpointId::unknown(), EndpointId::unknown(), tokens::OK);
        assert!(expect_token(&ok, tokens::OK, "OK").is_ok());
    }
}
