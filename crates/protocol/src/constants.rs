use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Hub protocol name sent in the handshake.
pub const PROTOCOL_NAME: &str = "json";

/// Hub protocol version sent in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Negotiate protocol version requested from the server.
///
/// Version 1 servers return a separate `connectionToken`; version 0 servers
/// only return a `connectionId` which doubles as the token.
pub const NEGOTIATE_VERSION: u32 = 1;

/// How often the client sends keep-alive pings.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Time to wait for any inbound frame before the connection is considered dead.
///
/// Servers ping every 15s by default, so this allows one missed ping.
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the server to answer the handshake request.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Time allowed for a graceful close before the transport is torn down.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-polling request timeout. Servers hold a poll for up to 90s.
pub const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(100);

/// Maximum number of negotiate redirects followed before giving up.
pub const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Maximum inbound message size in bytes (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Hub message type identifier.
///
/// Serialized as the bare integer the JSON hub protocol uses in its `type`
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Invocation,
    StreamItem,
    Completion,
    StreamInvocation,
    CancelInvocation,
    Ping,
    Close,
    Ack,
    Sequence,

    /// Forward compatibility: unknown message types deserialize here.
    Unknown(u8),
}

impl MessageType {
    /// Returns the wire code for this message type.
    pub fn code(self) -> u8 {
        match self {
            Self::Invocation => 1,
            Self::StreamItem => 2,
            Self::Completion => 3,
            Self::StreamInvocation => 4,
            Self::CancelInvocation => 5,
            Self::Ping => 6,
            Self::Close => 7,
            Self::Ack => 8,
            Self::Sequence => 9,
            Self::Unknown(code) => code,
        }
    }

    /// Maps a wire code to a message type.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Invocation,
            2 => Self::StreamItem,
            3 => Self::Completion,
            4 => Self::StreamInvocation,
            5 => Self::CancelInvocation,
            6 => Self::Ping,
            7 => Self::Close,
            8 => Self::Ack,
            9 => Self::Sequence,
            other => Self::Unknown(other),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Self::from_code)
    }
}
