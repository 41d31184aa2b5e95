//! Connection contract used by the hub manager.
//!
//! [`HubManager`](crate::HubManager) only talks to connections through these
//! traits, so the SignalR client can be swapped for an in-memory double in
//! tests.

use std::future::Future;

use cowork_protocol::TransportType;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::types::{
    CloseCallback, ConnectionEvent, ConnectionState, EventHandler, ReconnectPolicy, TokenSupplier,
};

/// Everything needed to open one hub connection.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Hub identifier, used for logging and events.
    pub hub: String,
    /// Full hub URL.
    pub url: String,
    /// Bearer token supplier, invoked on every negotiate.
    pub access_token: TokenSupplier,
    /// Backoff used after an established session drops.
    pub reconnect: ReconnectPolicy,
    /// Sink for lifecycle events.
    pub events: mpsc::Sender<ConnectionEvent>,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("hub", &self.hub)
            .field("url", &self.url)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

/// One bidirectional session to one hub.
pub trait HubConnection: Send + Sync + 'static {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Server-assigned connection id of the current session.
    fn connection_id(&self) -> Option<String>;

    /// Transport negotiated for the current session.
    fn transport(&self) -> Option<TransportType> {
        None
    }

    /// Attaches `handler` to server invocations of `event`.
    fn on_event(&self, event: &str, handler: EventHandler);

    /// Removes every handler attached to `event`.
    fn off_event(&self, event: &str);

    /// Registers a callback fired once when the connection closes for good.
    ///
    /// Fires immediately if the connection is already closed.
    fn on_close(&self, callback: CloseCallback);

    /// Invokes a hub method and waits for its completion.
    fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send;

    /// Invokes a hub method without waiting for a result.
    fn send(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Closes the connection gracefully.
    fn stop(&self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Opens hub connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: HubConnection;

    /// Performs one connect attempt. Retries are the caller's concern.
    fn connect(
        &self,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<Self::Connection, ClientError>> + Send;
}
