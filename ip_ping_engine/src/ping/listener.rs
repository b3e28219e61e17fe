use super::codec;
use super::table::CorrelationTable;
use super::waiter::Resolution;
use crate::transport::{Received, Transport};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};

/// The engine's single receive loop, running on its own thread until the
/// transport reports `Closed` or fails.
pub(crate) struct Listener {
    handle: JoinHandle<()>,
}

impl Listener {
    pub fn spawn<T: Transport>(
        transport: Arc<T>,
        table: Arc<CorrelationTable>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name("icmp-listener".into())
            .spawn(move || run(&*transport, &table, poll_interval))?;
        Ok(Self { handle })
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("listener thread panicked");
        }
    }
}

fn run<T: Transport>(transport: &T, table: &CorrelationTable, poll_interval: Duration) {
    debug!("listener started");
    loop {
        match transport.receive(poll_interval) {
            Ok(Received::Idle) => continue,
            Ok(Received::Frame(frame)) => {
                dispatch(table, &frame);
            }
            Ok(Received::Closed) => break,
            Err(e) => {
                error!(error = %e, "receive failed, listener exiting");
                break;
            }
        }
    }
    debug!("listener stopped");
}

/// Resolves the waiter matching an inbound Echo Reply. Anything that is not a
/// reply to a registered probe is dropped.
fn dispatch(table: &CorrelationTable, frame: &[u8]) -> bool {
    let reply = match codec::decode_echo_reply(frame) {
        Ok(reply) => reply,
        Err(e) => {
            trace!(error = %e, len = frame.len(), "ignoring frame");
            return false;
        }
    };
    let resolved = table.resolve(reply.key, Resolution::Reply { ttl: Some(reply.ttl) });
    if resolved {
        debug!(key = %reply.key, source = %reply.source, ttl = reply.ttl, "reply matched");
    } else {
        trace!(key = %reply.key, source = %reply.source, "reply without waiter");
    }
    resolved
}
