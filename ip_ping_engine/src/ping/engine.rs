//! Lifecycle of the shared probe engine and the public probe entry point.

use super::codec::MAX_ECHO_PAYLOAD;
use super::issuer::{self, ProbeRequest};
use super::listener::Listener;
use super::table::CorrelationTable;
use super::waiter::Resolution;
use super::{ProbeError, ProbeKey, ProbeOutcome};
use crate::transport::{OpenTransport, Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[source] TransportError),
    #[error("could not spawn the listener thread: {0}")]
    ListenerSpawn(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// ICMP identifier stamped on every request.
    pub identifier: u16,
    /// First sequence number handed out; later ones count up and wrap.
    pub first_sequence: u16,
    /// Upper bound of a single listener receive, i.e. how late `stop`
    /// can be noticed.
    pub poll_interval: Duration,
    /// TTL used when a probe does not ask for one.
    pub default_ttl: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identifier: std::process::id() as u16,
            first_sequence: 1,
            poll_interval: Duration::from_millis(50),
            default_ttl: 64,
        }
    }
}

/// Process-wide ICMP probe engine: one transport, one listener thread and the
/// correlation table they share with every caller of [`Engine::probe`].
///
/// All methods take `&self`; share the engine between threads with an `Arc`.
pub struct Engine<O: OpenTransport> {
    opener: O,
    config: EngineConfig,
    table: Arc<CorrelationTable>,
    sequence: AtomicU16,
    // Snapshot read by probes; `Some` exactly while running.
    transport: RwLock<Option<Arc<O::Transport>>>,
    // Held for the whole of start/stop, so they never interleave.
    listener: Mutex<Option<Listener>>,
}

impl<O: OpenTransport> Engine<O> {
    pub fn new(opener: O) -> Self {
        Self::with_config(opener, EngineConfig::default())
    }

    pub fn with_config(opener: O, config: EngineConfig) -> Self {
        Self {
            opener,
            config,
            table: Arc::new(CorrelationTable::new()),
            sequence: AtomicU16::new(config.first_sequence),
            transport: RwLock::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Opens the transport and spawns the listener. Does nothing if already
    /// running. On failure the engine stays stopped and may be started again.
    pub fn start(&self, interface_hint: &str) -> Result<(), EngineError> {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return Ok(());
        }

        let transport = self
            .opener
            .open(interface_hint)
            .map_err(EngineError::TransportUnavailable)?;
        let transport = Arc::new(transport);
        self.table.reopen();

        let spawned = Listener::spawn(
            Arc::clone(&transport),
            Arc::clone(&self.table),
            self.config.poll_interval,
        );
        match spawned {
            Ok(spawned) => *listener = Some(spawned),
            Err(e) => {
                transport.close();
                return Err(EngineError::ListenerSpawn(e));
            }
        }
        *self.transport.write() = Some(transport);

        info!(
            identifier = self.config.identifier,
            interface_hint, "probe engine started"
        );
        Ok(())
    }

    /// Stops the listener, closes the transport and fails every probe still
    /// waiting with "Engine shut down". Probes that got past the running
    /// check but had not registered yet fail the same way. Does nothing if
    /// already stopped.
    pub fn stop(&self) {
        let mut listener = self.listener.lock();
        let running = match listener.take() {
            Some(running) => running,
            None => return,
        };

        // New probes see the engine as stopped from here on.
        let transport = self.transport.write().take();
        if let Some(transport) = &transport {
            transport.close();
        }
        running.join();
        drop(transport);

        let drained = self
            .table
            .drain_with(Resolution::Failed(ProbeError::EngineShuttingDown));
        info!(drained, "probe engine stopped");
    }

    pub fn state(&self) -> EngineState {
        if self.transport.read().is_some() {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Number of probes currently waiting for a reply.
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    fn next_key(&self) -> ProbeKey {
        ProbeKey::new(
            self.config.identifier,
            self.sequence.fetch_add(1, Ordering::Relaxed),
        )
    }

    /// Sends one Echo Request to `destination` (dotted IPv4) and waits up to
    /// `timeout` for the reply. Never fails: errors come back as an outcome
    /// with `success == false`.
    pub fn probe(
        &self,
        destination: &str,
        timeout: Duration,
        payload_size: usize,
        ttl: Option<u8>,
    ) -> ProbeOutcome {
        let destination: Ipv4Addr = match destination.parse() {
            Ok(destination) => destination,
            Err(_) => return ProbeError::InvalidInput.into(),
        };
        if payload_size > MAX_ECHO_PAYLOAD {
            return ProbeError::PayloadTooLarge(payload_size).into();
        }
        let transport = match self.transport.read().clone() {
            Some(transport) => transport,
            None => return ProbeError::EngineUnavailable.into(),
        };

        let request = ProbeRequest {
            destination,
            timeout,
            payload_size,
            ttl: ttl.unwrap_or(self.config.default_ttl),
        };
        let key = self.next_key();
        if transport.is_local(destination) {
            debug!(%key, %destination, "local destination, bypassing listener");
            return issuer::issue_local(&*transport, key, &request);
        }
        issuer::issue(&*transport, &self.table, key, &request)
    }
}

impl<O: OpenTransport> Drop for Engine<O> {
    fn drop(&mut self) {
        self.stop();
    }
}
