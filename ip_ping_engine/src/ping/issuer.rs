use super::table::{CorrelationTable, TableError};
use super::waiter::{Resolution, Waiter};
use super::{codec, deadline_after, ProbeError, ProbeKey, ProbeOutcome};
use crate::transport::{Transport, TransportError};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProbeRequest {
    pub destination: Ipv4Addr,
    pub timeout: Duration,
    pub payload_size: usize,
    pub ttl: u8,
}

impl ProbeRequest {
    fn encode(&self, key: ProbeKey) -> Vec<u8> {
        codec::encode_echo_request(key, &vec![0u8; self.payload_size])
    }
}

/// One probe through the shared listener: register, send, wait, and on
/// timeout retract the registration.
pub(crate) fn issue<T: Transport>(
    transport: &T,
    table: &CorrelationTable,
    key: ProbeKey,
    request: &ProbeRequest,
) -> ProbeOutcome {
    let message = request.encode(key);

    let waiter = match table.register(key) {
        Ok(waiter) => waiter,
        Err(TableError::DuplicateKey(key)) => {
            warn!(%key, "probe key already in flight");
            return ProbeError::DuplicateKey(key).into();
        }
        Err(TableError::Closed) => return ProbeError::EngineShuttingDown.into(),
    };

    let sent_at = Instant::now();
    if let Err(e) = transport.send(request.destination, request.ttl, &message) {
        table.cancel(key);
        warn!(%key, destination = %request.destination, error = %e, "send failed");
        return ProbeError::SendFailed(e.to_string()).into();
    }
    debug!(%key, destination = %request.destination, ttl = request.ttl, "echo request sent");

    let resolution = match waiter.wait_until(deadline_after(sent_at, request.timeout)) {
        Some(resolution) => resolution,
        None => match retract(table, key, &waiter) {
            Some(resolution) => resolution,
            None => {
                debug!(%key, "probe timed out");
                return ProbeError::Timeout.into();
            }
        },
    };
    outcome(sent_at, resolution)
}

/// Withdraws a key whose wait timed out. The listener may have resolved it
/// right at the deadline: if it is no longer in the table, its resolution is
/// already in the waiter and wins over the timeout.
fn retract(table: &CorrelationTable, key: ProbeKey, waiter: &Waiter) -> Option<Resolution> {
    if table.cancel(key) {
        None
    } else {
        waiter.take()
    }
}

fn outcome(sent_at: Instant, resolution: Resolution) -> ProbeOutcome {
    match resolution {
        Resolution::Reply { ttl } => ProbeOutcome::reply(sent_at.elapsed(), ttl),
        Resolution::Failed(error) => error.into(),
    }
}

/// Echo to one of our own addresses without touching the correlation table.
pub(crate) fn issue_local<T: Transport>(
    transport: &T,
    key: ProbeKey,
    request: &ProbeRequest,
) -> ProbeOutcome {
    let message = request.encode(key);
    match transport.echo_local(
        request.destination,
        key,
        &message,
        request.ttl,
        request.timeout,
    ) {
        Ok(reply) => ProbeOutcome::reply(reply.rtt, reply.ttl),
        Err(TransportError::TimedOut) => ProbeError::Timeout.into(),
        Err(e) => ProbeError::LocalEchoFailed(e.to_string()).into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn timed_out_wait(waiter: &Waiter) {
        assert_eq!(waiter.wait_until(Instant::now()), None);
    }

    #[test]
    fn reply_at_the_deadline_wins_over_timeout() {
        let table = CorrelationTable::new();
        let key = ProbeKey::new(7, 7);
        let sent_at = Instant::now();
        let waiter = table.register(key).unwrap();

        timed_out_wait(&waiter);
        // The listener gets in between the expired wait and the retraction.
        assert!(table.resolve(key, Resolution::Reply { ttl: Some(55) }));

        let resolution = retract(&table, key, &waiter).unwrap();
        let outcome = outcome(sent_at, resolution);
        assert!(outcome.success);
        assert_eq!(outcome.ttl, 55);
        assert_eq!(outcome.error, None);
        assert!(table.is_empty());
    }

    #[test]
    fn unanswered_key_is_retracted() {
        let table = CorrelationTable::new();
        let key = ProbeKey::new(7, 8);
        let waiter = table.register(key).unwrap();

        timed_out_wait(&waiter);
        assert_eq!(retract(&table, key, &waiter), None);
        assert!(table.is_empty());
        // A reply arriving now finds nothing.
        assert!(!table.resolve(key, Resolution::Reply { ttl: Some(55) }));
    }

    #[test]
    fn shutdown_at_the_deadline_is_reported() {
        let table = CorrelationTable::new();
        let key = ProbeKey::new(7, 9);
        let waiter = table.register(key).unwrap();

        timed_out_wait(&waiter);
        table.drain_with(Resolution::Failed(ProbeError::EngineShuttingDown));

        let outcome = outcome(Instant::now(), retract(&table, key, &waiter).unwrap());
        assert_eq!(outcome.error.as_deref(), Some("Engine shut down"));
    }
}
