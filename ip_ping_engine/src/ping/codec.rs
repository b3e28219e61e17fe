//! Wire format of ICMP Echo messages and of the enclosing IPv4 header.
//!
//! Decoding never trusts offsets found in the buffer: every field is read
//! through a bounds checked accessor and a short buffer is a `DecodeError`.

use super::checksum::checksum;
use super::ProbeKey;
use pnet::packet::icmp::{IcmpType, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use thiserror::Error;

pub const ICMP_HEADER_LEN: usize = 8;
pub const IPV4_HEADER_LEN: usize = 20;
/// Largest Echo payload that still fits a 65535 byte IPv4 datagram.
pub const MAX_ECHO_PAYLOAD: usize = 0xFF_FF - IPV4_HEADER_LEN - ICMP_HEADER_LEN;

const ICMP_PROTOCOL: u8 = IpNextHeaderProtocols::Icmp.0;

const ICMP_TYPE_OFFSET: usize = 0;
const ICMP_CODE_OFFSET: usize = 1;
const ICMP_CHECKSUM_OFFSET: usize = 2;
const ICMP_ID_OFFSET: usize = 4;
const ICMP_SEQUENCE_OFFSET: usize = 6;

const IP_VERSION_IHL_OFFSET: usize = 0;
const IP_TOTAL_LENGTH_OFFSET: usize = 2;
const IP_IDENTIFICATION_OFFSET: usize = 4;
const IP_TTL_OFFSET: usize = 8;
const IP_PROTOCOL_OFFSET: usize = 9;
const IP_CHECKSUM_OFFSET: usize = 10;
const IP_SOURCE_OFFSET: usize = 12;
const IP_DESTINATION_OFFSET: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer too short: {needed} bytes needed, {actual} available")]
    Truncated { needed: usize, actual: usize },
    #[error("not an IPv4 datagram (version {0})")]
    NotIpv4(u8),
    #[error("invalid IPv4 header length {0}")]
    BadHeaderLength(usize),
    #[error("not ICMP (protocol {0})")]
    NotIcmp(u8),
    #[error("not an ICMP echo message (type {0})")]
    NotEcho(u8),
    #[error("ICMP echo request where a reply was expected")]
    NotReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    Request,
    Reply,
}

impl EchoKind {
    pub fn icmp_type(self) -> IcmpType {
        match self {
            Self::Request => IcmpTypes::EchoRequest,
            Self::Reply => IcmpTypes::EchoReply,
        }
    }

    fn from_icmp_type(ty: u8) -> Option<Self> {
        if ty == IcmpTypes::EchoRequest.0 {
            Some(Self::Request)
        } else if ty == IcmpTypes::EchoReply.0 {
            Some(Self::Reply)
        } else {
            None
        }
    }
}

/// A decoded ICMP Echo message borrowing its payload from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoMessage<'a> {
    pub kind: EchoKind,
    pub key: ProbeKey,
    pub payload: &'a [u8],
}

/// Fields of a 20 byte, option-less IPv4 header carrying ICMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ttl: u8,
    pub identification: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Datagram<'a> {
    pub header: Ipv4Header,
    pub protocol: u8,
    pub payload: &'a [u8],
}

/// What the listener needs from an inbound Echo Reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub key: ProbeKey,
    pub ttl: u8,
    pub source: Ipv4Addr,
}

fn read_u8(data: &[u8], offset: usize) -> Result<u8, DecodeError> {
    data.get(offset).copied().ok_or(DecodeError::Truncated {
        needed: offset + 1,
        actual: data.len(),
    })
}

fn read_be_u16(data: &[u8], offset: usize) -> Result<u16, DecodeError> {
    match data.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(DecodeError::Truncated {
            needed: offset + 2,
            actual: data.len(),
        }),
    }
}

fn read_ipv4_addr(data: &[u8], offset: usize) -> Result<Ipv4Addr, DecodeError> {
    match data.get(offset..offset + 4) {
        Some(bytes) => Ok(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])),
        None => Err(DecodeError::Truncated {
            needed: offset + 4,
            actual: data.len(),
        }),
    }
}

/// Builds an ICMP Echo message. The checksum covers the whole message and is
/// computed last, with its own field zeroed.
pub fn encode_echo(kind: EchoKind, key: ProbeKey, payload: &[u8]) -> Vec<u8> {
    let mut message = vec![0u8; ICMP_HEADER_LEN + payload.len()];
    message[ICMP_TYPE_OFFSET] = kind.icmp_type().0;
    message[ICMP_CODE_OFFSET] = 0;
    message[ICMP_ID_OFFSET..ICMP_ID_OFFSET + 2].copy_from_slice(&key.identifier.to_be_bytes());
    message[ICMP_SEQUENCE_OFFSET..ICMP_SEQUENCE_OFFSET + 2]
        .copy_from_slice(&key.sequence.to_be_bytes());
    message[ICMP_HEADER_LEN..].copy_from_slice(payload);
    let sum = checksum(&message);
    message[ICMP_CHECKSUM_OFFSET..ICMP_CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
    message
}

pub fn encode_echo_request(key: ProbeKey, payload: &[u8]) -> Vec<u8> {
    encode_echo(EchoKind::Request, key, payload)
}

pub fn decode_echo(message: &[u8]) -> Result<EchoMessage<'_>, DecodeError> {
    if message.len() < ICMP_HEADER_LEN {
        return Err(DecodeError::Truncated {
            needed: ICMP_HEADER_LEN,
            actual: message.len(),
        });
    }
    let ty = read_u8(message, ICMP_TYPE_OFFSET)?;
    let kind = EchoKind::from_icmp_type(ty).ok_or(DecodeError::NotEcho(ty))?;
    let key = ProbeKey::new(
        read_be_u16(message, ICMP_ID_OFFSET)?,
        read_be_u16(message, ICMP_SEQUENCE_OFFSET)?,
    );
    Ok(EchoMessage {
        kind,
        key,
        payload: &message[ICMP_HEADER_LEN..],
    })
}

/// Wraps an ICMP message in an option-less IPv4 header.
///
/// Fails when the datagram would not fit the 16 bit total length field.
pub fn encode_ipv4(header: &Ipv4Header, icmp: &[u8]) -> Option<Vec<u8>> {
    let total_length = u16::try_from(IPV4_HEADER_LEN + icmp.len()).ok()?;
    let mut datagram = vec![0u8; IPV4_HEADER_LEN + icmp.len()];
    datagram[IP_VERSION_IHL_OFFSET] = 0x45;
    datagram[IP_TOTAL_LENGTH_OFFSET..IP_TOTAL_LENGTH_OFFSET + 2]
        .copy_from_slice(&total_length.to_be_bytes());
    datagram[IP_IDENTIFICATION_OFFSET..IP_IDENTIFICATION_OFFSET + 2]
        .copy_from_slice(&header.identification.to_be_bytes());
    datagram[IP_TTL_OFFSET] = header.ttl;
    datagram[IP_PROTOCOL_OFFSET] = ICMP_PROTOCOL;
    datagram[IP_SOURCE_OFFSET..IP_SOURCE_OFFSET + 4].copy_from_slice(&header.source.octets());
    datagram[IP_DESTINATION_OFFSET..IP_DESTINATION_OFFSET + 4]
        .copy_from_slice(&header.destination.octets());
    let sum = checksum(&datagram[..IPV4_HEADER_LEN]);
    datagram[IP_CHECKSUM_OFFSET..IP_CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
    datagram[IPV4_HEADER_LEN..].copy_from_slice(icmp);
    Some(datagram)
}

pub fn decode_ipv4(frame: &[u8]) -> Result<Ipv4Datagram<'_>, DecodeError> {
    let version_ihl = read_u8(frame, IP_VERSION_IHL_OFFSET)?;
    let version = version_ihl >> 4;
    if version != 4 {
        return Err(DecodeError::NotIpv4(version));
    }
    let header_length = usize::from(version_ihl & 0x0F) * 4;
    if header_length < IPV4_HEADER_LEN {
        return Err(DecodeError::BadHeaderLength(header_length));
    }
    if frame.len() < header_length {
        return Err(DecodeError::Truncated {
            needed: header_length,
            actual: frame.len(),
        });
    }
    // Captures may be padded past the datagram; a bogus total length is ignored.
    let total_length = usize::from(read_be_u16(frame, IP_TOTAL_LENGTH_OFFSET)?);
    let end = if total_length >= header_length && total_length <= frame.len() {
        total_length
    } else {
        frame.len()
    };
    Ok(Ipv4Datagram {
        header: Ipv4Header {
            source: read_ipv4_addr(frame, IP_SOURCE_OFFSET)?,
            destination: read_ipv4_addr(frame, IP_DESTINATION_OFFSET)?,
            ttl: read_u8(frame, IP_TTL_OFFSET)?,
            identification: read_be_u16(frame, IP_IDENTIFICATION_OFFSET)?,
        },
        protocol: read_u8(frame, IP_PROTOCOL_OFFSET)?,
        payload: &frame[header_length..end],
    })
}

/// Accepts only IPv4 / ICMP / Echo Reply frames; anything else is an error the
/// caller is expected to drop silently.
pub fn decode_echo_reply(frame: &[u8]) -> Result<EchoReply, DecodeError> {
    let datagram = decode_ipv4(frame)?;
    if datagram.protocol != ICMP_PROTOCOL {
        return Err(DecodeError::NotIcmp(datagram.protocol));
    }
    let echo = decode_echo(datagram.payload)?;
    if echo.kind != EchoKind::Reply {
        return Err(DecodeError::NotReply);
    }
    Ok(EchoReply {
        key: echo.key,
        ttl: datagram.header.ttl,
        source: datagram.header.source,
    })
}
