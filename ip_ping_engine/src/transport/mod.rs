//! The capability the engine needs from the network: send an ICMP message,
//! receive inbound IPv4 frames with a bounded wait, and be closed.

#[cfg(target_os = "linux")]
mod dgram;
mod interfaces;
mod raw;
mod system;

#[cfg(target_os = "linux")]
pub use dgram::{DatagramOpener, DatagramTransport};
pub use raw::{PnetOpener, PnetTransport};
pub use system::{SystemOpener, SystemTransport};

use crate::ping::ProbeKey;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no usable network interface matching {0:?}")]
    NoInterface(String),
    #[error("transport closed")]
    Closed,
    #[error("operation not supported by this transport")]
    Unsupported,
    #[error("no reply before the deadline")]
    TimedOut,
    #[error("datagram of {0} bytes does not fit IPv4")]
    Oversized(usize),
}

/// Result of one bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Nothing arrived during the poll interval.
    Idle,
    /// A complete IPv4 datagram, header included.
    Frame(Vec<u8>),
    /// The transport was closed; no more frames will come.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalReply {
    pub rtt: Duration,
    pub ttl: Option<u8>,
}

pub trait Transport: Send + Sync + 'static {
    /// Sends one ICMP message (header and payload, checksum set) to
    /// `destination` with the given IP time-to-live.
    fn send(&self, destination: Ipv4Addr, ttl: u8, message: &[u8]) -> Result<(), TransportError>;

    /// Waits at most `poll_interval` for an inbound frame. Must return
    /// `Received::Idle` rather than block indefinitely.
    fn receive(&self, poll_interval: Duration) -> Result<Received, TransportError>;

    /// Makes any in-progress or later `receive` return `Received::Closed`.
    /// Later sends may fail; the engine does not rely on it.
    fn close(&self);

    /// Whether `destination` is one of this host's own addresses.
    fn is_local(&self, _destination: Ipv4Addr) -> bool {
        false
    }

    /// Self-contained echo to a local address, bypassing the shared listener.
    fn echo_local(
        &self,
        _destination: Ipv4Addr,
        _key: ProbeKey,
        _message: &[u8],
        _ttl: u8,
        _timeout: Duration,
    ) -> Result<LocalReply, TransportError> {
        Err(TransportError::Unsupported)
    }
}

/// Opens a transport on engine start.
pub trait OpenTransport: Send + Sync {
    type Transport: Transport;

    /// `interface_hint` is empty for automatic selection.
    fn open(&self, interface_hint: &str) -> Result<Self::Transport, TransportError>;
}

/// Receive errors that only mean "nothing yet".
pub(crate) fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
