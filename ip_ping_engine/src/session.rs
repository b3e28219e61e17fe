//! Multi-attempt pings on top of single probes. Retrying is decided here, by
//! the caller of the engine, never inside it.

use crate::ping::engine::Engine;
use crate::ping::ProbeOutcome;
use crate::transport::OpenTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anything that can run a single probe.
pub trait Prober {
    fn probe(
        &self,
        destination: &str,
        timeout: Duration,
        payload_size: usize,
        ttl: Option<u8>,
    ) -> ProbeOutcome;
}

impl<O: OpenTransport> Prober for Engine<O> {
    fn probe(
        &self,
        destination: &str,
        timeout: Duration,
        payload_size: usize,
        ttl: Option<u8>,
    ) -> ProbeOutcome {
        Engine::probe(self, destination, timeout, payload_size, ttl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingOptions {
    pub timeout: Duration,
    /// Number of sequential attempts, at least one is always made.
    pub retries: u32,
    /// Interface name (or part of it) the engine should be started on.
    pub interface: String,
    pub stop_on_first_success: bool,
    pub payload_size: usize,
    pub ttl: Option<u8>,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            retries: 1,
            interface: String::new(),
            stop_on_first_success: true,
            payload_size: 0,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResult {
    pub reachable: bool,
    /// Best (lowest) round trip time among successful probes, -1 if none.
    pub rtt_ms: i64,
    /// TTL observed with the best round trip time, -1 if none.
    pub ttl: i32,
    /// Every probe, in the order it was sent.
    pub probes: Vec<ProbeOutcome>,
}

impl Default for PingResult {
    fn default() -> Self {
        Self {
            reachable: false,
            rtt_ms: -1,
            ttl: -1,
            probes: vec![],
        }
    }
}

impl PingResult {
    pub fn push(&mut self, probe: ProbeOutcome) {
        if probe.success && (!self.reachable || probe.rtt_ms < self.rtt_ms) {
            self.reachable = true;
            self.rtt_ms = probe.rtt_ms;
            self.ttl = probe.ttl;
        }
        self.probes.push(probe);
    }

    /// Appends another result's probes, keeping the overall best reply.
    pub fn merge(&mut self, other: PingResult) {
        for probe in other.probes {
            self.push(probe);
        }
    }
}

pub fn ping_host<P: Prober + ?Sized>(
    prober: &P,
    destination: &str,
    options: &PingOptions,
) -> PingResult {
    let mut result = PingResult::default();
    for _ in 0..options.retries.max(1) {
        let probe = prober.probe(
            destination,
            options.timeout,
            options.payload_size,
            options.ttl,
        );
        let success = probe.success;
        result.push(probe);
        if success && options.stop_on_first_success {
            break;
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ping::ProbeError;
    use std::cell::RefCell;

    /// Replays a fixed list of outcomes and records what it was asked.
    struct Scripted {
        outcomes: RefCell<Vec<ProbeOutcome>>,
        calls: RefCell<Vec<(String, Duration, usize, Option<u8>)>>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<ProbeOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: RefCell::new(outcomes),
                calls: RefCell::new(vec![]),
            }
        }
    }

    impl Prober for Scripted {
        fn probe(
            &self,
            destination: &str,
            timeout: Duration,
            payload_size: usize,
            ttl: Option<u8>,
        ) -> ProbeOutcome {
            self.calls
                .borrow_mut()
                .push((destination.to_string(), timeout, payload_size, ttl));
            self.outcomes
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| ProbeError::Timeout.into())
        }
    }

    fn reply(rtt_ms: u64, ttl: u8) -> ProbeOutcome {
        ProbeOutcome::reply(Duration::from_millis(rtt_ms), Some(ttl))
    }

    #[test]
    fn stops_on_first_success() {
        let prober = Scripted::new(vec![ProbeError::Timeout.into(), reply(12, 57), reply(3, 57)]);
        let options = PingOptions {
            retries: 5,
            payload_size: 32,
            ttl: Some(9),
            ..PingOptions::default()
        };
        let result = ping_host(&prober, "192.0.2.1", &options);
        assert!(result.reachable);
        assert_eq!(result.rtt_ms, 12);
        assert_eq!(result.ttl, 57);
        assert_eq!(result.probes.len(), 2);
        let calls = prober.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            ("192.0.2.1".to_string(), Duration::from_millis(1000), 32, Some(9))
        );
    }

    #[test]
    fn keeps_best_reply_when_not_stopping() {
        let prober = Scripted::new(vec![reply(40, 50), reply(7, 51), reply(20, 52)]);
        let options = PingOptions {
            retries: 3,
            stop_on_first_success: false,
            ..PingOptions::default()
        };
        let result = ping_host(&prober, "192.0.2.1", &options);
        assert!(result.reachable);
        assert_eq!((result.rtt_ms, result.ttl), (7, 51));
        assert_eq!(result.probes.len(), 3);
    }

    #[test]
    fn at_least_one_attempt() {
        let prober = Scripted::new(vec![]);
        let options = PingOptions {
            retries: 0,
            ..PingOptions::default()
        };
        let result = ping_host(&prober, "192.0.2.1", &options);
        assert!(!result.reachable);
        assert_eq!((result.rtt_ms, result.ttl), (-1, -1));
        assert_eq!(result.probes.len(), 1);
        assert_eq!(result.probes[0].error.as_deref(), Some("Timeout"));
    }

    #[test]
    fn merge_keeps_all_probes() {
        let mut total = PingResult::default();
        let mut first = PingResult::default();
        first.push(reply(30, 60));
        let mut second = PingResult::default();
        second.push(ProbeError::Timeout.into());
        second.push(reply(10, 61));
        total.merge(first);
        total.merge(second);
        assert_eq!(total.probes.len(), 3);
        assert_eq!((total.rtt_ms, total.ttl), (10, 61));
    }
}
