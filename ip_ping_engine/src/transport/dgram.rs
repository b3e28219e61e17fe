//! Unprivileged ICMP through a Linux "ping socket" (`SOCK_DGRAM` with
//! `IPPROTO_ICMP`), usable by any user in `net.ipv4.ping_group_range`.
//!
//! The kernel hides the IP header and rewrites the echo identifier to the
//! socket's own port. Replies are turned back into the frames the listener
//! expects: the identifier of our requests is restored and an IPv4 header is
//! rebuilt around the message, carrying the TTL from `IP_RECVTTL`.

use super::interfaces::select_interface;
use super::{is_transient, OpenTransport, Received, Transport, TransportError};
use crate::ping::codec::{self, EchoKind, Ipv4Header};
use crate::ping::ProbeKey;
use parking_lot::Mutex;
use pnet::datalink;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::convert::TryFrom;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Shutdown, SocketAddrV4};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const RECV_BUFFER_SIZE: usize = 2048;
const NO_IDENTIFIER: u32 = u32::MAX;
// The kernel refuses a zero receive timeout.
const MIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default)]
pub struct DatagramOpener;

impl DatagramOpener {
    pub fn new() -> Self {
        Self
    }
}

impl OpenTransport for DatagramOpener {
    type Transport = DatagramTransport;

    fn open(&self, interface_hint: &str) -> Result<DatagramTransport, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
        enable_recv_ttl(&socket)?;

        let interface = if interface_hint.is_empty() {
            None
        } else {
            let interfaces = datalink::interfaces();
            let interface = select_interface(&interfaces, interface_hint)
                .ok_or_else(|| TransportError::NoInterface(interface_hint.to_string()))?;
            if let Err(e) = socket.bind_device(Some(interface.name.as_bytes())) {
                warn!(interface = %interface.name, error = %e, "could not bind ping socket to interface");
            }
            Some(interface.name.clone())
        };

        info!(interface = ?interface, "opened ICMP datagram socket");
        Ok(DatagramTransport {
            socket,
            send_lock: Mutex::new(()),
            identifier: AtomicU32::new(NO_IDENTIFIER),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct DatagramTransport {
    socket: Socket,
    // TTL is a socket option here: setting it and sending must not interleave.
    send_lock: Mutex<()>,
    // Identifier of the last request sent, restored on replies.
    identifier: AtomicU32,
    closed: AtomicBool,
}

impl Transport for DatagramTransport {
    fn send(&self, destination: Ipv4Addr, ttl: u8, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if let Ok(echo) = codec::decode_echo(message) {
            self.identifier
                .store(u32::from(echo.key.identifier), Ordering::Relaxed);
        }
        let address = SockAddr::from(SocketAddrV4::new(destination, 0));
        let _guard = self.send_lock.lock();
        self.socket.set_ttl(u32::from(ttl))?;
        self.socket.send_to(message, &address)?;
        Ok(())
    }

    fn receive(&self, poll_interval: Duration) -> Result<Received, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(Received::Closed);
        }
        self.socket.set_read_timeout(Some(poll_interval.max(MIN_POLL)))?;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let received = match recv_with_ttl(&self.socket, &mut buffer) {
            Ok(received) => received,
            Err(e) if is_transient(&e) => return Ok(self.idle_or_closed()),
            Err(e) => return Err(e.into()),
        };
        // Zero bytes after `close` shut the read side down.
        if received.len == 0 {
            return Ok(self.idle_or_closed());
        }

        let identifier = match u16::try_from(self.identifier.load(Ordering::Relaxed)) {
            Ok(identifier) => Some(identifier),
            Err(_) => None,
        };
        match rebuild_frame(&buffer[..received.len], received.source, received.ttl, identifier) {
            Some(frame) => Ok(Received::Frame(frame)),
            None => Ok(Received::Idle),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Wakes a receive blocked in the kernel.
            let _ = self.socket.shutdown(Shutdown::Read);
            debug!("ICMP datagram socket closed");
        }
    }
}

impl DatagramTransport {
    fn idle_or_closed(&self) -> Received {
        if self.closed.load(Ordering::Acquire) {
            Received::Closed
        } else {
            Received::Idle
        }
    }
}

struct Datagram {
    len: usize,
    source: Ipv4Addr,
    ttl: Option<u8>,
}

fn enable_recv_ttl(socket: &Socket) -> io::Result<()> {
    let one: libc::c_int = 1;
    // SAFETY: `one` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_RECVTTL,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// `recvmsg` that also returns the sender and the `IP_TTL` control message.
fn recv_with_ttl(socket: &Socket, buffer: &mut [u8]) -> io::Result<Datagram> {
    // u64 storage keeps the control buffer aligned for `cmsghdr`.
    let mut control = [0u64; 8];
    // SAFETY: all-zero is a valid `sockaddr_in` and `msghdr`.
    let mut source: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
        iov_len: buffer.len(),
    };
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut source as *mut libc::sockaddr_in as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = mem::size_of_val(&control) as _;

    // SAFETY: every pointer in `msg` refers to a live local buffer of the
    // advertised size.
    let len = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut ttl = None;
    // SAFETY: the kernel filled `msg_control` and `msg_controllen`; the CMSG
    // macros stay within them.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_TTL {
                let value = (libc::CMSG_DATA(cmsg) as *const libc::c_int).read_unaligned();
                ttl = u8::try_from(value).ok();
                break;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(Datagram {
        len: len as usize,
        source: Ipv4Addr::from(u32::from_be(source.sin_addr.s_addr)),
        ttl,
    })
}

/// Wraps a bare ICMP message from the ping socket into an IPv4 datagram.
/// Echo Replies get `identifier` back in place of the socket's port; other
/// messages are wrapped untouched and left to the listener to discard.
fn rebuild_frame(
    message: &[u8],
    source: Ipv4Addr,
    ttl: Option<u8>,
    identifier: Option<u16>,
) -> Option<Vec<u8>> {
    let restored;
    let message = match (codec::decode_echo(message), identifier) {
        (Ok(echo), Some(identifier)) if echo.kind == EchoKind::Reply => {
            let key = ProbeKey::new(identifier, echo.key.sequence);
            restored = codec::encode_echo(EchoKind::Reply, key, echo.payload);
            &restored[..]
        }
        _ => message,
    };
    let header = Ipv4Header {
        source,
        destination: Ipv4Addr::UNSPECIFIED,
        ttl: ttl.unwrap_or(0),
        identification: 0,
    };
    codec::encode_ipv4(&header, message)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_gets_the_request_identifier_back() {
        // The kernel answered on socket port 0x9c41.
        let message = codec::encode_echo(EchoKind::Reply, ProbeKey::new(0x9c41, 12), b"data");
        let source = Ipv4Addr::new(198, 51, 100, 3);
        let frame = rebuild_frame(&message, source, Some(57), Some(0x4242)).unwrap();

        let reply = codec::decode_echo_reply(&frame).unwrap();
        assert_eq!(reply.key, ProbeKey::new(0x4242, 12));
        assert_eq!(reply.ttl, 57);
        assert_eq!(reply.source, source);

        let datagram = codec::decode_ipv4(&frame).unwrap();
        let echo = codec::decode_echo(datagram.payload).unwrap();
        assert_eq!(echo.payload, b"data");
        assert!(crate::ping::checksum::verify(datagram.payload));
    }

    #[test]
    fn reply_before_any_request_keeps_its_identifier() {
        let message = codec::encode_echo(EchoKind::Reply, ProbeKey::new(0x9c41, 1), &[]);
        let frame = rebuild_frame(&message, Ipv4Addr::LOCALHOST, Some(64), None).unwrap();
        assert_eq!(
            codec::decode_echo_reply(&frame).unwrap().key,
            ProbeKey::new(0x9c41, 1)
        );
    }

    #[test]
    fn non_replies_are_not_rewritten() {
        let message = codec::encode_echo(EchoKind::Request, ProbeKey::new(0x9c41, 3), &[]);
        let frame = rebuild_frame(&message, Ipv4Addr::LOCALHOST, None, Some(0x4242)).unwrap();
        let datagram = codec::decode_ipv4(&frame).unwrap();
        assert_eq!(datagram.payload, &message[..]);
        assert!(codec::decode_echo_reply(&frame).is_err());
    }
}
