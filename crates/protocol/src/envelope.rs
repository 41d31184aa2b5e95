use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MessageType;

/// Envelope for every hub protocol message.
///
/// The JSON hub protocol uses one flat object per message whose populated
/// fields depend on `type`. Absent fields are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_reconnect: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

impl Message {
    /// Creates an empty message of the given type.
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            invocation_id: None,
            target: None,
            arguments: None,
            stream_ids: None,
            item: None,
            result: None,
            error: None,
            allow_reconnect: None,
            headers: None,
        }
    }

    /// Creates an invocation of `target`.
    ///
    /// Without an invocation id the server treats it as fire-and-forget and
    /// sends no completion.
    pub fn invocation(
        invocation_id: Option<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            invocation_id,
            target: Some(target.into()),
            arguments: Some(arguments),
            ..Self::new(MessageType::Invocation)
        }
    }

    /// Creates a successful completion for an invocation.
    pub fn completion(invocation_id: impl Into<String>, result: Option<Value>) -> Self {
        Self {
            invocation_id: Some(invocation_id.into()),
            result,
            ..Self::new(MessageType::Completion)
        }
    }

    /// Creates a failed completion for an invocation.
    pub fn completion_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: Some(invocation_id.into()),
            error: Some(error.into()),
            ..Self::new(MessageType::Completion)
        }
    }

    /// Creates a keep-alive ping.
    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    /// Creates a close message.
    pub fn close(error: Option<String>, allow_reconnect: bool) -> Self {
        Self {
            error,
            allow_reconnect: allow_reconnect.then_some(true),
            ..Self::new(MessageType::Close)
        }
    }

    /// Returns the invocation arguments, or an empty slice.
    pub fn args(&self) -> &[Value] {
        self.arguments.as_deref().unwrap_or_default()
    }

    /// Deserializes the completion result into the given type.
    pub fn parse_result<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.result {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }
}
