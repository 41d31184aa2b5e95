//! Public types for the hub connection manager.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cowork_protocol::TransportType;

/// Lifecycle state of a hub connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No session. Terminal for a handle.
    Disconnected,
    /// Negotiate, transport start or handshake in progress.
    Connecting,
    /// Handshake completed; invocations and events flow.
    Connected,
    /// Session lost after a successful connect, reconnecting automatically.
    Reconnecting { attempt: u32 },
    /// Graceful close requested.
    Closing,
}

impl ConnectionState {
    /// Returns `true` only for [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events emitted by the hub manager and its connections.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection state changed for a hub.
    StateChanged { hub: String, state: ConnectionState },
    /// An initial connect attempt failed; the next one starts after `delay`.
    Retrying {
        hub: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The session dropped and an automatic reconnect is scheduled.
    Reconnecting {
        hub: String,
        attempt: u32,
        next_retry_ms: u64,
    },
    /// The session was restored after a drop.
    Reconnected {
        hub: String,
        connection_id: Option<String>,
    },
    /// The connection reached its terminal closed state.
    Closed { hub: String, error: Option<String> },
}

/// Returns the access token to present on every negotiate and reconnect.
pub type TokenSupplier = Arc<dyn Fn() -> String + Send + Sync>;

/// Callback for a server-pushed event; receives the invocation arguments.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Callback fired once when a connection closes for good.
pub type CloseCallback = Box<dyn FnOnce(Option<String>) + Send>;

/// Outcome of [`HubManager::register_event`](crate::HubManager::register_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Attached to the live connection.
    Attached,
    /// No connection yet; attached when the hub next connects.
    Queued,
}

/// Retry policy for the initial connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total connect attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt, doubled after each further one.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay after failed attempt `attempt` (1-based): `base × 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exp))
    }
}

/// Backoff for automatic reconnect after an established session drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based):
    /// `min(max, initial × 2^attempt)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(32);
        let ms = self
            .initial_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Snapshot of a live connection, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub hub: String,
    pub state: ConnectionState,
    pub connection_id: Option<String>,
    pub transport: Option<TransportType>,
}
