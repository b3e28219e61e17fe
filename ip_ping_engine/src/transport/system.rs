//! The transport a program should normally use: the unprivileged ping socket
//! where the platform has one, the raw pnet channel otherwise.

#[cfg(target_os = "linux")]
use super::dgram::{DatagramOpener, DatagramTransport};
use super::raw::{PnetOpener, PnetTransport};
use super::{LocalReply, OpenTransport, Received, Transport, TransportError};
use crate::ping::ProbeKey;
use std::net::Ipv4Addr;
use std::time::Duration;
#[cfg(target_os = "linux")]
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct SystemOpener {
    raw: PnetOpener,
}

impl SystemOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

pub enum SystemTransport {
    #[cfg(target_os = "linux")]
    Datagram(DatagramTransport),
    Raw(PnetTransport),
}

impl OpenTransport for SystemOpener {
    type Transport = SystemTransport;

    fn open(&self, interface_hint: &str) -> Result<SystemTransport, TransportError> {
        #[cfg(target_os = "linux")]
        {
            match DatagramOpener::new().open(interface_hint) {
                Ok(transport) => return Ok(SystemTransport::Datagram(transport)),
                Err(e @ TransportError::NoInterface(_)) => return Err(e),
                Err(e) => warn!(
                    error = %e,
                    "ICMP datagram socket unavailable, falling back to raw channel"
                ),
            }
        }
        self.raw.open(interface_hint).map(SystemTransport::Raw)
    }
}

impl Transport for SystemTransport {
    fn send(&self, destination: Ipv4Addr, ttl: u8, message: &[u8]) -> Result<(), TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Datagram(transport) => transport.send(destination, ttl, message),
            Self::Raw(transport) => transport.send(destination, ttl, message),
        }
    }

    fn receive(&self, poll_interval: Duration) -> Result<Received, TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Datagram(transport) => transport.receive(poll_interval),
            Self::Raw(transport) => transport.receive(poll_interval),
        }
    }

    fn close(&self) {
        match self {
            #[cfg(target_os = "linux")]
            Self::Datagram(transport) => transport.close(),
            Self::Raw(transport) => transport.close(),
        }
    }

    fn is_local(&self, destination: Ipv4Addr) -> bool {
        match self {
            #[cfg(target_os = "linux")]
            Self::Datagram(transport) => transport.is_local(destination),
            Self::Raw(transport) => transport.is_local(destination),
        }
    }

    fn echo_local(
        &self,
        destination: Ipv4Addr,
        key: ProbeKey,
        message: &[u8],
        ttl: u8,
        timeout: Duration,
    ) -> Result<LocalReply, TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Datagram(transport) => {
                transport.echo_local(destination, key, message, ttl, timeout)
            }
            Self::Raw(transport) => transport.echo_local(destination, key, message, ttl, timeout),
        }
    }
}
