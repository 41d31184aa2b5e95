//! Hub protocol handshake messages.

use serde::{Deserialize, Serialize};

use crate::constants::{PROTOCOL_NAME, PROTOCOL_VERSION};

/// First frame sent by the client after the transport opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    /// Handshake selecting the JSON hub protocol.
    pub fn json() -> Self {
        Self {
            protocol: PROTOCOL_NAME.into(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// Server answer to the handshake. An empty object means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor_version: Option<u32>,
}

impl HandshakeResponse {
    /// Returns the server error, if the handshake was rejected.
    pub fn rejection(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}
