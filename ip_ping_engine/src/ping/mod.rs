pub mod checksum;
pub mod codec;
pub mod engine;
mod issuer;
mod listener;
pub mod table;
pub mod waiter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on any single wait, so absurd timeouts cannot overflow `Instant`.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start + timeout.min(MAX_WAIT)
}

/// Identifies one in-flight probe: the ICMP identifier and sequence number
/// carried by the request and echoed back by the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeKey {
    pub identifier: u16,
    pub sequence: u16,
}

impl ProbeKey {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self {
            identifier,
            sequence,
        }
    }
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}/{}", self.identifier, self.sequence)
    }
}

/// Why a single probe failed.
///
/// The `Display` text is what ends up in [`ProbeOutcome::error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("Invalid IP")]
    InvalidInput,
    #[error("Payload too large ({0} bytes)")]
    PayloadTooLarge(usize),
    #[error("Engine not running")]
    EngineUnavailable,
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Duplicate probe key {0}")]
    DuplicateKey(ProbeKey),
    #[error("Engine shut down")]
    EngineShuttingDown,
    #[error("Local ICMP failed: {0}")]
    LocalEchoFailed(String),
}

/// Result of one probe. Failures are values too: `success == false` and a
/// human readable `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,
    /// Round trip time in milliseconds, -1 when there was no reply.
    pub rtt_ms: i64,
    /// TTL of the reply's IP header, -1 when unknown.
    pub ttl: i32,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn reply(rtt: Duration, ttl: Option<u8>) -> Self {
        Self {
            success: true,
            rtt_ms: rtt.as_millis() as i64,
            ttl: ttl.map_or(-1, i32::from),
            error: None,
        }
    }

    pub fn failure(error: &ProbeError) -> Self {
        Self {
            success: false,
            rtt_ms: -1,
            ttl: -1,
            error: Some(error.to_string()),
        }
    }
}

impl From<ProbeError> for ProbeOutcome {
    fn from(error: ProbeError) -> Self {
        Self::failure(&error)
    }
}
