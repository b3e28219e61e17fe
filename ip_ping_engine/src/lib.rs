//! ICMP Echo probing with a shared, thread-based probe engine.
//!
//! A single [`Engine`] owns one transport and one listener thread. Any number
//! of caller threads may call [`Engine::probe`] concurrently; each call blocks
//! only its own thread until the matching Echo Reply arrives, the timeout
//! elapses or the engine is stopped.

pub mod ping;
pub mod session;
pub mod transport;

pub use ping::engine::{Engine, EngineConfig, EngineError, EngineState};
pub use ping::{ProbeError, ProbeKey, ProbeOutcome};
pub use session::{ping_host, PingOptions, PingResult, Prober};
pub use transport::{
    OpenTransport, PnetOpener, PnetTransport, SystemOpener, SystemTransport, Transport,
};
