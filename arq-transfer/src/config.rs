//! Validated endpoint configuration.
//!
//! Command-line values are checked here, before any socket is opened, so an
//! invalid invocation never reaches the network.  Timing knobs live in
//! [`ArqTimings`]; the protocol code reads them from there and never
//! hard-codes the poll timeout or the failure budget.

use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::frame::MAX_PAYLOAD;

/// Readiness-poll timeout used by both endpoints.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(3);

/// Consecutive failures tolerated before a session is abandoned.
pub const DEFAULT_MAX_FAILURES: u32 = 10;

/// Receive size for the provider's accept loop.
pub const ACCEPT_BUFFER: usize = 512;

/// Inclusive bounds of the `-b` argument.
pub const MIN_CHUNK_ARG: u64 = 1;
pub const MAX_CHUNK_ARG: u64 = 65_536_000_000;

/// Inclusive upper bound of the `-e` argument.
pub const MAX_ERROR_RATE: i64 = 100;

/// Timing parameters shared by both state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArqTimings {
    /// How long a single readiness poll waits.
    pub poll_timeout: Duration,
    /// Consecutive failed polls/attempts allowed; one more aborts.
    pub max_failures: u32,
}

impl Default for ArqTimings {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

/// Input validation failures; all fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Please choose a buffer size between 1 and 65536000000 (inclusive).")]
    BufferSize { value: u64 },
    #[error("Please choose an error probability between 0 and 100 (inclusive).")]
    ErrorRate { value: i64 },
    #[error("a buffer size of {value} does not fit in one frame (largest payload is {max} bytes)")]
    ChunkTooLarge { value: u64, max: usize },
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{host} did not resolve to any address")]
    NoAddress { host: String },
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub port: u16,
    pub file: PathBuf,
    /// Payload bytes per data frame.
    pub chunk_size: usize,
    /// Percentage of data frames to corrupt, `0..=100`.
    pub error_rate: u8,
    pub timings: ArqTimings,
}

impl ProviderConfig {
    /// Check the raw command-line values.
    pub fn validate(
        port: u16,
        file: PathBuf,
        chunk_size: u64,
        error_rate: i64,
    ) -> Result<Self, ConfigError> {
        if !(MIN_CHUNK_ARG..=MAX_CHUNK_ARG).contains(&chunk_size) {
            return Err(ConfigError::BufferSize { value: chunk_size });
        }
        if !(0..=MAX_ERROR_RATE).contains(&error_rate) {
            return Err(ConfigError::ErrorRate { value: error_rate });
        }
        let chunk = usize::try_from(chunk_size)
            .ok()
            .filter(|c| *c <= MAX_PAYLOAD)
            .ok_or(ConfigError::ChunkTooLarge {
                value: chunk_size,
                max: MAX_PAYLOAD,
            })?;

        Ok(Self {
            port,
            file,
            chunk_size: chunk,
            error_rate: error_rate as u8,
            timings: ArqTimings::default(),
        })
    }

    /// The provider listens on every interface.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

}

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RequesterConfig {
    pub server: SocketAddr,
    /// Directory the received file is written into.
    pub output_dir: PathBuf,
    pub timings: ArqTimings,
}

impl RequesterConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            output_dir: PathBuf::from("."),
            timings: ArqTimings::default(),
        }
    }

    /// Resolve `host:port` to the provider's address.
    pub fn resolve(host: &str, port: u16, output_dir: PathBuf) -> Result<Self, ConfigError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| ConfigError::Resolve {
                host: host.to_string(),
                source,
            })?;
        let server = prefer_ipv4(addrs).ok_or_else(|| ConfigError::NoAddress {
            host: host.to_string(),
        })?;
        Ok(Self {
            output_dir,
            ..Self::new(server)
        })
    }

    /// Local address to bind: an ephemeral port of the server's family.
    pub fn bind_addr(&self) -> SocketAddr {
        match self.server {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)),
        }
    }
}

/// The first IPv4 address, else the first address of any family.
///
/// Providers only listen on IPv4, so a name such as `localhost` that also
/// resolves to `::1` must not end up on the IPv6 loopback.
pub fn prefer_ipv4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut first = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}
