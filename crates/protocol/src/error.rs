//! Error types for the hub protocol.

/// Errors produced while encoding or decoding hub protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is missing the record separator")]
    MissingSeparator,

    #[error("frame too large ({0} bytes)")]
    TooLarge(usize),

    #[error("unexpected message type {0}")]
    UnexpectedType(u8),
}
