//! Requester endpoint: handshake, metadata retrieval and the receive loop.
//!
//! A [`Requester`] owns one socket and performs exactly one transfer:
//!
//! 1. `REQUESTING`: send `request_data`, wait for `request_accepted`.
//! 2. `CONFIGURING`: record the provider identifier and frame size, send `OK`.
//! 3. `AWAITING_TOTAL` / `AWAITING_NAME`: record frame count and filename.
//! 4. `READY`: send `ready`.
//! 5. `RECEIVING`: stop-and-wait loop, acknowledging every in-order frame
//!    and re-acknowledging the last completed one on corruption or silence.
//!
//! Any failure is fatal and nothing is written to disk.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::config::{ArqTimings, RequesterConfig};
use crate::error::TransferError;
use crate::frame::{tokens, EndpointId, Frame, FRAME_OVERHEAD, MAX_FRAME_LEN};
use crate::progress::{percent, Progress};
use crate::receiver::{Delivery, Receiver};
use crate::seq::Seq;
use crate::socket::Socket;
use crate::state::RequesterState;

/// Prefix added to the announced filename when saving.
pub const RECEIVED_PREFIX: &str = "received_";

/// Bytes and counters of a completed (not yet persisted) transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub data: Vec<u8>,
    pub frames: u64,
    pub corrupted_frames: u64,
    /// Polls that saw no datagram while receiving.
    pub timeouts: u64,
}

/// Outcome of [`Requester::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub filename: String,
    pub saved_to: PathBuf,
    pub frames: u64,
    pub bytes: usize,
    pub corrupted_frames: u64,
    pub timeouts: u64,
}

pub struct Requester {
    socket: Socket,
    server: SocketAddr,
    id: EndpointId,
    /// Learned in `CONFIGURING`.
    provider_id: EndpointId,
    /// Negotiated frame size, learned in `CONFIGURING`.
    frame_size: usize,
    timings: ArqTimings,
    output_dir: PathBuf,
    state: RequesterState,
}

impl Requester {
    /// Bind an ephemeral local socket for a transfer from `config.server`.
    pub async fn connect(config: RequesterConfig) -> Result<Self, TransferError> {
        let socket = Socket::bind(config.bind_addr()).await?;
        Ok(Self::new(socket, config))
    }

    pub fn new(socket: Socket, config: RequesterConfig) -> Self {
        Self {
            socket,
            server: config.server,
            id: EndpointId::random(),
            provider_id: EndpointId::unknown(),
            frame_size: 0,
            timings: config.timings,
            output_dir: config.output_dir,
            state: RequesterState::default(),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn state(&self) -> RequesterState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Fetch the file and save it as `received_<name>` in the output directory.
    pub async fn run<P: Progress>(&mut self, progress: P) -> Result<TransferReport, TransferError> {
        let download = self.fetch(progress).await?;

        log::info!("Transmission completed.");
        log::info!(
            "Corrupted frames received during transmission: {}",
            download.corrupted_frames
        );

        let saved_to = match save(&self.output_dir, &download).await {
            Ok(path) => path,
            Err(e) => {
                self.transition(RequesterState::Failed);
                return Err(e);
            }
        };
        log::info!("File has been saved as '{}'.", saved_to.display());

        Ok(TransferReport {
            filename: download.filename,
            saved_to,
            frames: download.frames,
            bytes: download.data.len(),
            corrupted_frames: download.corrupted_frames,
            timeouts: download.timeouts,
        })
    }

    /// Run the protocol to completion and return the reassembled bytes.
    pub async fn fetch<P: Progress>(&mut self, mut progress: P) -> Result<Download, TransferError> {
        let result = self.fetch_inner(&mut progress).await;
        match &result {
            Ok(_) => self.transition(RequesterState::Done),
            Err(e) => {
                log::error!("[requester] {e}");
                self.transition(RequesterState::Failed);
            }
        }
        result
    }

    async fn fetch_inner<P: Progress>(&mut self, progress: &mut P) -> Result<Download, TransferError> {
        self.request().await?;
        self.configure().await?;
        let total = self.await_total().await?;
        let filename = self.await_name().await?;
        self.signal_ready().await?;

        log::info!("Receiving file '{filename}' from {}.", self.server);
        let receiver = self.receive(total, &filename, progress).await?;

        Ok(Download {
            filename,
            frames: receiver.received_frames(),
            corrupted_frames: receiver.corrupted_frames(),
            timeouts: receiver.timeouts(),
            data: receiver.into_bytes(),
        })
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    async fn request(&mut self) -> Result<(), TransferError> {
        self.transition(RequesterState::Requesting);
        let request = Frame::control(EndpointId::unknown(), self.id, tokens::REQUEST_DATA);
        self.socket.send_frame(&request, self.server).await?;

        let reply = self.await_frame("request acceptance").await?;
        if !reply.is(tokens::REQUEST_ACCEPTED) {
            return Err(TransferError::Rejected {
                payload: reply.payload_text(),
            });
        }
        Ok(())
    }

    async fn configure(&mut self) -> Result<(), TransferError> {
        self.transition(RequesterState::Configuring);
        let config = self.await_frame("frame size").await?;
        let frame_size: usize = parse_number(&config, "frame size")?;
        if frame_size <= FRAME_OVERHEAD || frame_size > MAX_FRAME_LEN {
            return Err(TransferError::InvalidMetadata(format!(
                "frame size {frame_size} outside {}..={MAX_FRAME_LEN}",
                FRAME_OVERHEAD + 1
            )));
        }

        self.provider_id = config.src;
        self.frame_size = frame_size;
        log::debug!(
            "[requester] provider {} negotiated {frame_size}-byte frames",
            self.provider_id
        );

        let ok = Frame::control(self.provider_id, self.id, tokens::OK);
        self.socket.send_frame(&ok, self.server).await?;
        Ok(())
    }

    async fn await_total(&mut self) -> Result<u64, TransferError> {
        self.transition(RequesterState::AwaitingTotal);
        let frame = self.await_frame("frame count").await?;
        parse_number(&frame, "frame count")
    }

    async fn await_name(&mut self) -> Result<String, TransferError> {
        self.transition(RequesterState::AwaitingName);
        let frame = self.await_frame("filename").await?;
        sanitize_filename(&frame.payload_text())
    }

    async fn signal_ready(&mut self) -> Result<(), TransferError> {
        self.transition(RequesterState::Ready);
        let ready = Frame::control(self.provider_id, self.id, tokens::READY);
        self.socket.send_frame(&ready, self.server).await?;
        Ok(())
    }

    /// Wait for one intact frame from the provider, bounded by the failure budget.
    async fn await_frame(&self, stage: &'static str) -> Result<Frame, TransferError> {
        let mut silent = 0u32;
        loop {
            match self.socket.poll_recv(self.timings.poll_timeout).await? {
                None => {
                    silent += 1;
                    if silent > self.timings.max_failures {
                        return Err(TransferError::NoResponse { attempts: silent });
                    }
                }
                Some(d) if d.from != self.server => {
                    log::debug!("[requester] ignoring datagram from {}", d.from);
                }
                Some(d) => return d.frame().map_err(|_| TransferError::Corrupted { stage }),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Receive loop
    // -----------------------------------------------------------------------

    async fn receive<P: Progress>(
        &mut self,
        total: u64,
        filename: &str,
        progress: &mut P,
    ) -> Result<Receiver, TransferError> {
        self.transition(RequesterState::Receiving);
        let mut receiver = Receiver::new(total, self.frame_size);
        progress.start(&format!("Receiving '{filename}' from {}", self.server), total);

        while !receiver.is_complete() {
            let Some(datagram) = self.socket.poll_recv(self.timings.poll_timeout).await? else {
                // Nothing arrived: ask again for the frame after the last one completed.
                self.send_ack(receiver.ack_seq()).await?;
                let silent = receiver.on_silence();
                if silent > self.timings.max_failures {
                    progress.finish();
                    log::error!("The server stopped responding. Quitting.");
                    return Err(TransferError::NoResponse { attempts: silent });
                }
                log::debug!(
                    "[requester] silent poll #{silent}; re-acked {}",
                    receiver.ack_seq()
                );
                continue;
            };
            if datagram.from != self.server {
                continue;
            }

            match receiver.on_datagram(&datagram.bytes) {
                Delivery::Accepted { ack } => {
                    self.send_ack(ack).await?;
                    let done = receiver.received_frames();
                    progress.advance(done, total);
                    log::debug!(
                        "[requester] ← DATA seq={ack}; → ACK{ack} ({:.2}%)",
                        percent(done, total)
                    );
                }
                Delivery::Corrupted { ack } => {
                    log::debug!("[requester] corrupted frame; → ACK{ack}");
                    self.send_ack(ack).await?;
                }
                Delivery::Unexpected { seq } => {
                    log::debug!(
                        "[requester] ← DATA seq={seq} unexpected (want {})",
                        receiver.expected()
                    );
                }
            }
        }

        progress.finish();
        Ok(receiver)
    }

    async fn send_ack(&self, seq: Seq) -> Result<(), TransferError> {
        let ack = Frame::ack(self.provider_id, self.id, seq);
        self.socket.send_frame(&ack, self.server).await?;
        Ok(())
    }

    fn transition(&mut self, next: RequesterState) {
        if self.state != next {
            log::debug!("[requester] {} → {}", self.state, next);
            self.state = next;
        }
    }
}

fn parse_number<T: std::str::FromStr>(frame: &Frame, what: &str) -> Result<T, TransferError> {
    let text = frame.payload_text();
    text.trim()
        .parse()
        .map_err(|_| TransferError::InvalidMetadata(format!("{what} {text:?}")))
}

/// Reduce an announced filename to its final path component.
pub fn sanitize_filename(raw: &str) -> Result<String, TransferError> {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransferError::InvalidMetadata(format!("filename {raw:?}")))
}

/// Where a received file called `filename` is written.
pub fn received_path(output_dir: &Path, filename: &str) -> PathBuf {
    output_dir.join(format!("{RECEIVED_PREFIX}{filename}"))
}

/// Write the reassembled bytes verbatim under the derived name.
pub async fn save(output_dir: &Path, download: &Download) -> Result<PathBuf, TransferError> {
    let path = received_path(output_dir, &download.filename);
    tokio::fs::write(&path, &download.data).await?;
    Ok(path)
}
