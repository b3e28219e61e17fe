use super::interfaces::{ipv4_addresses, select_interface};
use super::{is_transient, LocalReply, OpenTransport, Received, Transport, TransportError};
use crate::ping::codec::{self, Ipv4Header};
use crate::ping::{deadline_after, ProbeKey};
use parking_lot::Mutex;
use pnet::datalink;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use pnet::transport::TransportChannelType::Layer3;
use pnet::transport::{ipv4_packet_iter, transport_channel};
use pnet::transport::{TransportReceiver, TransportSender};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Opens raw IPv4/ICMP channels through pnet.
///
/// Both directions go through a Layer 3 channel: outgoing messages get an
/// IPv4 header built here (so the TTL travels with each datagram instead of
/// being a socket-wide setting) and inbound frames keep their IP header, which
/// is where the reply TTL comes from. Needs CAP_NET_RAW or root.
#[derive(Debug, Clone)]
pub struct PnetOpener {
    buffer_size: usize,
}

impl Default for PnetOpener {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl PnetOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpenTransport for PnetOpener {
    type Transport = PnetTransport;

    fn open(&self, interface_hint: &str) -> Result<PnetTransport, TransportError> {
        let interfaces = datalink::interfaces();
        let interface = select_interface(&interfaces, interface_hint)
            .ok_or_else(|| TransportError::NoInterface(interface_hint.to_string()))?;
        let (tx, rx) = open_channel(self.buffer_size)?;
        info!(interface = %interface.name, "opened raw ICMP channel");
        Ok(PnetTransport {
            interface: interface.name.clone(),
            local_addresses: ipv4_addresses(&interfaces),
            buffer_size: self.buffer_size,
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }
}

fn open_channel(buffer_size: usize) -> io::Result<(TransportSender, TransportReceiver)> {
    transport_channel(buffer_size, Layer3(IpNextHeaderProtocols::Icmp))
}

fn send_datagram(
    tx: &mut TransportSender,
    destination: Ipv4Addr,
    ttl: u8,
    message: &[u8],
) -> Result<(), TransportError> {
    // Zero source and identification are filled in by the kernel.
    let header = Ipv4Header {
        source: Ipv4Addr::UNSPECIFIED,
        destination,
        ttl,
        identification: 0,
    };
    let datagram =
        codec::encode_ipv4(&header, message).ok_or(TransportError::Oversized(message.len()))?;
    let packet =
        Ipv4Packet::new(&datagram).ok_or(TransportError::Oversized(datagram.len()))?;
    tx.send_to(packet, IpAddr::V4(destination))?;
    Ok(())
}

pub struct PnetTransport {
    interface: String,
    local_addresses: Vec<Ipv4Addr>,
    buffer_size: usize,
    tx: Mutex<TransportSender>,
    rx: Mutex<TransportReceiver>,
    closed: AtomicBool,
}

impl PnetTransport {
    fn idle_or_closed(&self) -> Received {
        if self.closed.load(Ordering::Acquire) {
            Received::Closed
        } else {
            Received::Idle
        }
    }
}

impl Transport for PnetTransport {
    fn send(&self, destination: Ipv4Addr, ttl: u8, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        send_datagram(&mut self.tx.lock(), destination, ttl, message)
    }

    fn receive(&self, poll_interval: Duration) -> Result<Received, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(Received::Closed);
        }
        let mut rx = self.rx.lock();
        let mut packets = ipv4_packet_iter(&mut *rx);
        match packets.next_with_timeout(poll_interval) {
            Ok(Some((packet, _))) => Ok(Received::Frame(packet.packet().to_vec())),
            Ok(None) => Ok(self.idle_or_closed()),
            Err(e) if is_transient(&e) => Ok(self.idle_or_closed()),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(interface = %self.interface, "raw ICMP channel closed");
        }
    }

    fn is_local(&self, destination: Ipv4Addr) -> bool {
        destination.is_loopback() || self.local_addresses.contains(&destination)
    }

    /// Sends over a private channel and reads it until the matching reply.
    /// The shared listener sees the reply too but has no waiter for the key.
    fn echo_local(
        &self,
        destination: Ipv4Addr,
        key: ProbeKey,
        message: &[u8],
        ttl: u8,
        timeout: Duration,
    ) -> Result<LocalReply, TransportError> {
        let (mut tx, mut rx) = open_channel(self.buffer_size)?;
        let sent_at = Instant::now();
        send_datagram(&mut tx, destination, ttl, message)?;

        let deadline = deadline_after(sent_at, timeout);
        let mut packets = ipv4_packet_iter(&mut rx);
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::TimedOut);
            }
            match packets.next_with_timeout(deadline - now) {
                Ok(Some((packet, _))) => match codec::decode_echo_reply(packet.packet()) {
                    Ok(reply) if reply.key == key => {
                        return Ok(LocalReply {
                            rtt: sent_at.elapsed(),
                            ttl: Some(reply.ttl),
                        })
                    }
                    _ => continue,
                },
                Ok(None) => return Err(TransportError::TimedOut),
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
