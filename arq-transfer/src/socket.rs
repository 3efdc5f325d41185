//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket`.  It moves raw
//! datagrams only; integrity checking happens in the state machines so that
//! a corrupted frame can be counted and answered rather than lost inside the
//! transport.  Every wait except the provider's accept is bounded through
//! [`Socket::poll_recv`] / [`Socket::recv_until`].

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::frame::{Frame, FrameError, MAX_FRAME_LEN};

/// Receive buffer large enough for any well-formed frame plus slack, so an
/// over-long datagram arrives whole and fails the size check instead of
/// being silently truncated.
pub const MAX_DATAGRAM: usize = MAX_FRAME_LEN + 1024;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode frame: {0}")]
    Frame(#[from] FrameError),
}

/// One received datagram and its origin.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub from: SocketAddr,
}

impl Datagram {
    /// Verify and parse the datagram as a frame.
    pub fn frame(&self) -> Result<Frame, FrameError> {
        Frame::decode(&self.bytes)
    }
}

/// A datagram socket exclusively owned by one endpoint process.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send already-encoded bytes as one datagram.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Encode `frame` and send it; returns the bytes that went on the wire.
    pub async fn send_frame(&self, frame: &Frame, dest: SocketAddr) -> Result<Vec<u8>, SocketError> {
        let bytes = frame.encode()?;
        self.send_to(&bytes, dest).await?;
        Ok(bytes)
    }

    /// Block until a datagram arrives, reading at most `max_len` bytes of it.
    pub async fn recv_from(&self, max_len: usize) -> Result<Datagram, SocketError> {
        let mut buf = vec![0u8; max_len];
        let (n, from) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok(Datagram { bytes: buf, from })
    }

    /// Wait up to `wait` for a datagram; `Ok(None)` when nothing arrived.
    pub async fn poll_recv(&self, wait: Duration) -> Result<Option<Datagram>, SocketError> {
        self.recv_until(Instant::now() + wait).await
    }

    /// Wait until `deadline` for a datagram; `Ok(None)` once it has passed.
    pub async fn recv_until(&self, deadline: Instant) -> Result<Option<Datagram>, SocketError> {
        match tokio::time::timeout_at(deadline, self.recv_from(MAX_DATAGRAM)).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{tokens, EndpointId};

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn frame_crosses_loopback_intact() {
        let a = loopback().await;
        let b = loopback().await;
        let frame = Frame::control(EndpointId::unknown(), EndpointId::new("abc"), tokens::OK);
        let sent = a.send_frame(&frame, b.local_addr).await.unwrap();

        let got = b.poll_recv(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(got.bytes, sent);
        assert_eq!(got.from, a.local_addr);
        assert_eq!(got.frame().unwrap(), frame);
    }

    #[tokio::test]
    async fn poll_times_out_when_silent() {
        let a = loopback().await;
        let got = a.poll_recv(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn bounded_receive_truncates() {
        let a = loopback().await;
        let b = loopback().await;
        a.send_to(&[7u8; 600], b.local_addr).await.unwrap();
        let got = b.recv_from(512).await.unwrap();
        assert_eq!(got.bytes.len(), 512);
    }
}
