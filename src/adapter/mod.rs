//! Adapter connections: per-adapter TCP clients feeding the agent.
//!
//! Each adapter connection is an independent task owning its socket,
//! heartbeat, and reconnect timers. Connection failures are retried forever
//! and reported as [`AdapterEvent`]s over a broadcast channel; nothing an
//! adapter does is fatal to the agent, and one adapter's failure never
//! affects another or the buffer's availability.

mod connection;

pub use connection::{AdapterConnection, AdapterHandle};

use crate::error::AgentResult;
use crate::observation::ObservationInput;
use async_trait::async_trait;
use std::time::Duration;

/// Connection lifecycle, published through a `watch` channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Connection happenings, published through a `broadcast` channel for
/// logging/metrics consumers. The connection never blocks on receivers.
#[derive(Clone, Debug)]
pub enum AdapterEvent {
    Connected { peer: String },
    ConnectFailed { error: String },
    Disconnected { reason: String },
    PingSent,
    PongReceived { heartbeat: Option<Duration> },
    CommandReceived { key: String, value: String },
}

/// Where decoded observations go. The agent implements this; tests swap in
/// channel-backed fakes.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    /// Ingest one observation input. Returns the assigned sequence, or
    /// `None` when duplicate-suppressed.
    async fn accept(&self, input: ObservationInput) -> AgentResult<Option<u64>>;

    /// The adapter connected: mark the device available if configured.
    async fn device_connected(&self, device_key: &str) -> AgentResult<()>;

    /// The adapter dropped: mark the device (and, per policy, its items)
    /// unavailable.
    async fn device_disconnected(&self, device_key: &str) -> AgentResult<()>;
}
