//! Negotiate endpoint payloads.

use serde::{Deserialize, Serialize};

/// Transport kinds a server may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    WebSockets,
    ServerSentEvents,
    LongPolling,

    /// Forward compatibility: unknown transports deserialize here.
    #[serde(other)]
    Unknown,
}

impl TransportType {
    /// Client preference order, richest bidirectional transport first.
    pub const PREFERENCE: [TransportType; 3] = [
        TransportType::WebSockets,
        TransportType::ServerSentEvents,
        TransportType::LongPolling,
    ];
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WebSockets => "WebSockets",
            Self::ServerSentEvents => "ServerSentEvents",
            Self::LongPolling => "LongPolling",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Transfer formats a transport supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferFormat {
    Text,
    Binary,
    #[serde(other)]
    Unknown,
}

/// One transport entry in a negotiate response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: TransportType,
    #[serde(default)]
    pub transfer_formats: Vec<TransferFormat>,
}

/// Response of `POST {hub}/negotiate`.
///
/// Either a redirect (`url` + `accessToken`), an `error`, or a connection
/// description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_token: Option<String>,
    #[serde(default)]
    pub negotiate_version: u32,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NegotiateResponse {
    /// Returns the value sent as the `id` query parameter on transport requests.
    ///
    /// Version 0 servers use the connection id for this.
    pub fn connection_key(&self) -> Option<&str> {
        if self.negotiate_version >= 1 {
            self.connection_token.as_deref()
        } else {
            self.connection_id.as_deref()
        }
    }

    /// Returns `true` if the server offers `transport` with text framing.
    pub fn offers(&self, transport: TransportType) -> bool {
        self.available_transports.iter().any(|t| {
            t.transport == transport && t.transfer_formats.contains(&TransferFormat::Text)
        })
    }

    /// Offered text transports in client preference order.
    pub fn preferred_transports(&self) -> Vec<TransportType> {
        TransportType::PREFERENCE
            .into_iter()
            .filter(|t| self.offers(*t))
            .collect()
    }

    /// Returns `true` if the response redirects to another endpoint.
    pub fn is_redirect(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
    }
}
