//! Error types for the hub connection layer.

use tokio_tungstenite::tungstenite;

use cowork_protocol::ProtocolError;

/// Errors from a single hub connection (negotiate, transport, handshake,
/// invocation).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("access token rejected")]
    Unauthorized,

    #[error("negotiate failed: {0}")]
    Negotiate(String),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("no supported transport available")]
    NoTransport,

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error: {0}")]
    Server(String),
}

impl ClientError {
    /// Returns `true` if retrying the same request may succeed.
    ///
    /// Rejected credentials and malformed endpoints never fix themselves.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unauthorized | Self::InvalidUrl(_))
    }
}

/// Errors surfaced by [`HubManager`](crate::HubManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("unknown hub '{hub}'")]
    Configuration { hub: String },

    #[error("missing or rejected access token for hub '{hub}'")]
    Authentication { hub: String },

    #[error("failed to connect to hub '{hub}' after {attempts} attempt(s): {source}")]
    Connection {
        hub: String,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("hub '{hub}' is not connected")]
    NotConnected { hub: String },

    #[error("invocation of '{method}' on hub '{hub}' failed: {source}")]
    Invocation {
        hub: String,
        method: String,
        #[source]
        source: ClientError,
    },

    #[error("connection to hub '{hub}' was cancelled")]
    Cancelled { hub: String },
}
