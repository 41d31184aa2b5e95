//! Hub manager orchestrating connection lifecycle, events and invocations.
//!
//! Opens one connection per configured hub, retries the initial connect
//! with exponential backoff, keeps the registry in sync with connection
//! closure, and routes event registrations and invocations to the live
//! connection.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::SignalRConnector;
use crate::config::HubConfig;
use crate::connection::{ConnectOptions, Connector, HubConnection};
use crate::error::{ClientError, HubError};
use crate::registry::ConnectionRegistry;
use crate::retry::connect_with_retry;
use crate::types::{
    ConnectionEvent, ConnectionInfo, ConnectionState, EventHandler, Registration, TokenSupplier,
};

type QueuedHandlers = HashMap<String, Vec<(String, EventHandler)>>;

/// Multi-hub connection manager.
pub struct HubManager<K: Connector = SignalRConnector> {
    config: HubConfig,
    connector: K,
    registry: ConnectionRegistry<K::Connection>,
    /// Serializes start/stop per hub.
    guards: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Registrations made before the hub had a connection.
    queued: std::sync::Mutex<QueuedHandlers>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl HubManager<SignalRConnector> {
    /// Creates a manager that connects over SignalR.
    pub fn new(config: HubConfig) -> Result<Self, ClientError> {
        Ok(Self::with_connector(config, SignalRConnector::new()?))
    }
}

impl<K: Connector> HubManager<K> {
    /// Creates a manager with a custom connector.
    pub fn with_connector(config: HubConfig, connector: K) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let registry = ConnectionRegistry::new(config.hubs.keys().cloned());

        Self {
            config,
            connector,
            registry,
            guards: std::sync::Mutex::new(HashMap::new()),
            queued: std::sync::Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Returns the configuration this manager was built with.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry<K::Connection> {
        &self.registry
    }

    /// Returns the connector.
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Returns the lifecycle state of `hub`.
    pub fn state(&self, hub: &str) -> Result<ConnectionState, HubError> {
        if let Some(conn) = self.registry.get(hub)? {
            return Ok(conn.state());
        }
        if self.registry.is_connecting(hub) {
            return Ok(ConnectionState::Connecting);
        }
        Ok(ConnectionState::Disconnected)
    }

    /// Returns a snapshot of the live connection for `hub`.
    pub fn connection_info(&self, hub: &str) -> Result<Option<ConnectionInfo>, HubError> {
        Ok(self.registry.get(hub)?.map(|conn| ConnectionInfo {
            hub: hub.to_string(),
            state: conn.state(),
            connection_id: conn.connection_id(),
            transport: conn.transport(),
        }))
    }

    /// Connects to `hub` with a fixed bearer token.
    ///
    /// Returns the existing connection if the hub is already connected.
    pub async fn start_connection(
        &self,
        hub: &str,
        access_token: &str,
    ) -> Result<Arc<K::Connection>, HubError> {
        let token = access_token.to_string();
        self.start_connection_with(hub, Arc::new(move || token.clone()))
            .await
    }

    /// Connects to `hub`, asking `access_token` for a token on every
    /// negotiate so rotated tokens are used on reconnect.
    pub async fn start_connection_with(
        &self,
        hub: &str,
        access_token: TokenSupplier,
    ) -> Result<Arc<K::Connection>, HubError> {
        let url = self.config.hub_url(hub)?;
        if access_token().trim().is_empty() {
            warn!(hub, "refusing to connect without an access token");
            return Err(HubError::Authentication { hub: hub.into() });
        }

        let guard = self.guard(hub);
        let _op = guard.lock().await;

        if let Some(existing) = self.registry.get(hub)? {
            let state = existing.state();
            if state.is_connected() {
                debug!(hub, "already connected, reusing connection");
                return Ok(existing);
            }
            info!(hub, state = ?state, "replacing stale connection");
            self.close(hub, &existing).await;
        }

        let cancel = CancellationToken::new();
        self.registry.begin(hub, cancel.clone());
        self.emit_state(hub, ConnectionState::Connecting);
        info!(hub, url = %url, "starting connection");

        let options = ConnectOptions {
            hub: hub.to_string(),
            url,
            access_token,
            reconnect: self.config.reconnect.clone(),
            events: self.events_tx.clone(),
        };

        let conn = match connect_with_retry(
            &self.connector,
            &options,
            &self.config.retry,
            &cancel,
            &self.events_tx,
        )
        .await
        {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                self.registry.clear(hub);
                self.emit_state(hub, ConnectionState::Disconnected);
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            // A stop arrived after the last attempt succeeded.
            debug!(hub, "start cancelled after connect, closing");
            if let Err(e) = conn.stop().await {
                debug!(hub, error = %e, "error closing cancelled connection");
            }
            self.registry.clear(hub);
            self.emit_state(hub, ConnectionState::Disconnected);
            return Err(HubError::Cancelled { hub: hub.into() });
        }

        {
            let mut queued = self.queued();
            self.registry.set(hub, conn.clone());
            if let Some(pending) = queued.remove(hub) {
                debug!(hub, count = pending.len(), "attaching queued event handlers");
                for (event, handler) in pending {
                    conn.on_event(&event, handler);
                }
            }
        }
        self.install_close_handler(hub, &conn);

        self.emit_state(hub, ConnectionState::Connected);
        info!(hub, connection_id = ?conn.connection_id(), "hub connected");
        Ok(conn)
    }

    /// Closes the connection for `hub` and removes its registry entry.
    ///
    /// Aborts an in-flight start. Stopping a hub that was never started is a
    /// no-op.
    pub async fn stop_connection(&self, hub: &str) -> Result<(), HubError> {
        self.config.hub_path(hub)?;

        if self.registry.cancel_pending(hub) {
            debug!(hub, "cancelled in-flight start");
        }

        let guard = self.guard(hub);
        let _op = guard.lock().await;

        let Some(conn) = self.registry.get(hub)? else {
            debug!(hub, "no connection to stop");
            return Ok(());
        };

        if conn.state() == ConnectionState::Disconnected {
            self.registry.clear_if(hub, &conn);
            return Ok(());
        }

        self.close(hub, &conn).await;
        Ok(())
    }

    /// Stops every hub with a live or in-flight connection.
    pub async fn shutdown(&self) {
        for hub in self.registry.active_hubs() {
            if let Err(e) = self.stop_connection(&hub).await {
                warn!(hub = %hub, error = %e, "error stopping hub during shutdown");
            }
        }
        info!("hub manager shut down");
    }

    /// Attaches `handler` to server pushes of `event` on `hub`.
    ///
    /// Without a live connection the registration is queued and attached when
    /// the hub next connects. The same handler registered twice fires twice.
    pub fn register_event<F>(
        &self,
        hub: &str,
        event: &str,
        handler: F,
    ) -> Result<Registration, HubError>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        let mut queued = self.queued();

        match self.registry.get(hub)? {
            Some(conn) => {
                let state = conn.state();
                if !state.is_connected() {
                    warn!(
                        hub,
                        event,
                        state = ?state,
                        "registering event on a connection that is not connected"
                    );
                }
                conn.on_event(event, handler);
                debug!(hub, event, "event handler attached");
                Ok(Registration::Attached)
            }
            None => {
                queued
                    .entry(hub.to_string())
                    .or_default()
                    .push((event.to_string(), handler));
                debug!(hub, event, "no connection yet, event handler queued");
                Ok(Registration::Queued)
            }
        }
    }

    /// Removes every handler for `event` on `hub`, attached or queued.
    pub fn unregister_event(&self, hub: &str, event: &str) -> Result<(), HubError> {
        let mut queued = self.queued();
        let conn = self.registry.get(hub)?;

        if let Some(pending) = queued.get_mut(hub) {
            pending.retain(|(name, _)| !name.eq_ignore_ascii_case(event));
            if pending.is_empty() {
                queued.remove(hub);
            }
        }

        if let Some(conn) = conn {
            conn.off_event(event);
            debug!(hub, event, "event handlers removed");
        }
        Ok(())
    }

    /// Invokes `method` on `hub` and waits for its result.
    pub async fn invoke(
        &self,
        hub: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, HubError> {
        let conn = self.connected(hub)?;
        debug!(hub, method, "invoking hub method");
        conn.invoke(method, args)
            .await
            .map_err(|source| HubError::Invocation {
                hub: hub.into(),
                method: method.into(),
                source,
            })
    }

    /// Invokes `method` and deserializes its result.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        hub: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, HubError> {
        let value = self.invoke(hub, method, args).await?;
        serde_json::from_value(value).map_err(|e| HubError::Invocation {
            hub: hub.into(),
            method: method.into(),
            source: ClientError::Json(e),
        })
    }

    /// Invokes `method` on `hub` without waiting for a result.
    pub async fn send(&self, hub: &str, method: &str, args: Vec<Value>) -> Result<(), HubError> {
        let conn = self.connected(hub)?;
        conn.send(method, args)
            .await
            .map_err(|source| HubError::Invocation {
                hub: hub.into(),
                method: method.into(),
                source,
            })
    }

    /// Returns the connection for `hub` if it is connected.
    fn connected(&self, hub: &str) -> Result<Arc<K::Connection>, HubError> {
        match self.registry.get(hub)? {
            Some(conn) if conn.state().is_connected() => Ok(conn),
            _ => Err(HubError::NotConnected { hub: hub.into() }),
        }
    }

    /// Stops `conn` and clears its entry, even if stopping fails.
    async fn close(&self, hub: &str, conn: &Arc<K::Connection>) {
        info!(hub, "stopping connection");
        if let Err(e) = conn.stop().await {
            warn!(hub, error = %e, "error while closing connection");
        }
        self.registry.clear_if(hub, conn);
        self.emit_state(hub, ConnectionState::Disconnected);
    }

    /// Removes the registry entry when `conn` closes for good.
    fn install_close_handler(&self, hub: &str, conn: &Arc<K::Connection>) {
        let registry = self.registry.clone();
        let events_tx = self.events_tx.clone();
        let hub = hub.to_string();
        let weak = Arc::downgrade(conn);

        conn.on_close(Box::new(move |error| {
            if let Some(conn) = weak.upgrade()
                && registry.clear_if(&hub, &conn)
            {
                debug!(hub = %hub, "registry entry removed on close");
            }
            match &error {
                Some(e) => warn!(hub = %hub, error = %e, "connection closed with error"),
                None => info!(hub = %hub, "connection closed"),
            }
            let _ = events_tx.try_send(ConnectionEvent::Closed { hub, error });
        }));
    }

    fn guard(&self, hub: &str) -> Arc<Mutex<()>> {
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(hub.to_string())
            .or_default()
            .clone()
    }

    fn queued(&self) -> std::sync::MutexGuard<'_, QueuedHandlers> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_state(&self, hub: &str, state: ConnectionState) {
        let _ = self.events_tx.try_send(ConnectionEvent::StateChanged {
            hub: hub.to_string(),
            state,
        });
    }
}
