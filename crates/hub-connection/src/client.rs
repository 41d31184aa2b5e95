//! SignalR hub client: one logical connection to one hub.
//!
//! A [`HubClient`] outlives individual transport sessions. When a session
//! drops unexpectedly the client reconnects on its own, keeping its event
//! handlers, until it is stopped or the server refuses it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cowork_protocol::framing::write_frame;
use cowork_protocol::{Message, TransportType};

use crate::connection::{ConnectOptions, Connector, HubConnection};
use crate::error::ClientError;
use crate::handlers::{HandlerTable, PendingInvocations};
use crate::pumps::ping::ping_pump;
use crate::pumps::read::{Dispatch, SessionEnd, read_pump};
use crate::reconnection::reconnect_loop;
use crate::session::{self, Established, Establisher, Session};
use crate::transport::TransportLink;
use crate::types::{CloseCallback, ConnectionState, EventHandler};

/// Production [`Connector`] speaking the SignalR JSON hub protocol.
#[derive(Clone)]
pub struct SignalRConnector {
    http: reqwest::Client,
}

impl SignalRConnector {
    pub fn new() -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cowork-realtime/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Uses an existing HTTP client for negotiate and HTTP transports.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Connector for SignalRConnector {
    type Connection = HubClient;

    async fn connect(&self, options: &ConnectOptions) -> Result<HubClient, ClientError> {
        HubClient::connect(self.http.clone(), options.clone()).await
    }
}

/// Connection to one hub.
pub struct HubClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) options: ConnectOptions,
    /// Opens replacement sessions on reconnect.
    pub(crate) establish: Establisher,
    state: RwLock<ConnectionState>,
    connection_id: RwLock<Option<String>>,
    transport: RwLock<Option<TransportType>>,
    handlers: Arc<HandlerTable>,
    pending: Arc<PendingInvocations>,
    pub(crate) session: tokio::sync::Mutex<Option<Session>>,
    close_callbacks: Mutex<Vec<CloseCallback>>,
    closed: AtomicBool,
    stopping: AtomicBool,
    /// Cancelled on stop or terminal close; ends any reconnect loop.
    pub(crate) lifetime: CancellationToken,
}

impl HubClient {
    /// Negotiates, opens a transport and completes the handshake.
    pub async fn connect(http: reqwest::Client, options: ConnectOptions) -> Result<Self, ClientError> {
        let token = (options.access_token)();
        let established = session::establish(&http, &options.url, &token).await?;
        let establish = session::http_establisher(http, options.url.clone());
        Ok(Self::start(establish, options, established).await)
    }

    pub(crate) async fn start(
        establish: Establisher,
        options: ConnectOptions,
        established: Established,
    ) -> Self {
        let inner = Arc::new(ClientInner {
            options,
            establish,
            state: RwLock::new(ConnectionState::Connecting),
            connection_id: RwLock::new(None),
            transport: RwLock::new(None),
            handlers: Arc::new(HandlerTable::default()),
            pending: Arc::new(PendingInvocations::default()),
            session: tokio::sync::Mutex::new(None),
            close_callbacks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            lifetime: CancellationToken::new(),
        });

        {
            let mut slot = inner.session.lock().await;
            *slot = Some(inner.install(established));
        }
        info!(
            hub = %inner.options.hub,
            connection_id = ?inner.connection_id(),
            transport = ?inner.transport(),
            "hub client connected"
        );
        Self { inner }
    }

    /// Number of handlers attached to `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner.handlers.count(event)
    }

    async fn send_frame(&self, msg: &Message) -> Result<(), ClientError> {
        let frame = write_frame(msg)?;
        let outbound = self
            .inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.outbound.clone())
            .ok_or(ClientError::Closed)?;
        outbound.send(frame).await.map_err(|_| ClientError::Closed)
    }
}

impl HubConnection for HubClient {
    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    fn connection_id(&self) -> Option<String> {
        self.inner.connection_id()
    }

    fn transport(&self) -> Option<TransportType> {
        self.inner.transport()
    }

    fn on_event(&self, event: &str, handler: EventHandler) {
        self.inner.handlers.on(event, handler);
    }

    fn off_event(&self, event: &str) {
        self.inner.handlers.off(event);
    }

    fn on_close(&self, callback: CloseCallback) {
        let mut callbacks = self
            .inner
            .close_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.closed.load(Ordering::SeqCst) {
            drop(callbacks);
            callback(None);
            return;
        }
        callbacks.push(callback);
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        if !self.state().is_connected() {
            return Err(ClientError::Closed);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let rx = self.inner.pending.insert(&id);
        let msg = Message::invocation(Some(id.clone()), method, args);

        if let Err(e) = self.send_frame(&msg).await {
            self.inner.pending.remove(&id);
            return Err(e);
        }
        debug!(hub = %self.inner.options.hub, method, invocation_id = %id, "invocation sent");

        let result = rx.await;
        // Clean up pending entry on any exit path.
        self.inner.pending.remove(&id);
        result.unwrap_or(Err(ClientError::Closed))
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), ClientError> {
        if !self.state().is_connected() {
            return Err(ClientError::Closed);
        }
        self.send_frame(&Message::invocation(None, method, args))
            .await
    }

    async fn stop(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        inner.stopping.store(true, Ordering::SeqCst);
        inner.set_state(ConnectionState::Closing);
        inner.lifetime.cancel();

        let session = inner.session.lock().await.take();
        let result = match session {
            Some(session) => {
                session.send_close();
                session.close().await
            }
            None => Ok(()),
        };

        inner.pending.fail_all(|| ClientError::Closed);
        inner.finish(None);
        info!(hub = %inner.options.hub, "hub client stopped");
        result
    }
}

impl ClientInner {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn connection_id(&self) -> Option<String> {
        self.connection_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transport(&self) -> Option<TransportType> {
        *self.transport.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Moves to `Reconnecting` unless the client is stopping or closed.
    ///
    /// Checked under the state lock so a concurrent [`finish`](Self::finish)
    /// is never overwritten.
    pub(crate) fn enter_reconnecting(&self, attempt: u32) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if self.is_stopping() || self.closed.load(Ordering::SeqCst) || self.lifetime.is_cancelled() {
            return false;
        }
        *state = ConnectionState::Reconnecting { attempt };
        true
    }

    /// Spawns the pumps for a freshly established transport and marks the
    /// client connected.
    pub(crate) fn install(self: &Arc<Self>, established: Established) -> Session {
        let Established {
            connection_id,
            link,
            buffer,
            leftover,
        } = established;
        let TransportLink {
            kind,
            outbound,
            inbound,
            tasks,
        } = link;

        let pumps = CancellationToken::new();
        let dispatch = Dispatch {
            hub: self.options.hub.clone(),
            handlers: self.handlers.clone(),
            pending: self.pending.clone(),
        };

        {
            let weak = Arc::downgrade(self);
            let cancel = pumps.clone();
            tokio::spawn(async move {
                let end = read_pump(inbound, buffer, leftover, dispatch, cancel).await;
                if let Some(inner) = weak.upgrade() {
                    inner.session_ended(end).await;
                }
            });
        }
        tokio::spawn(ping_pump(outbound.clone(), pumps.clone()));

        *self
            .connection_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = connection_id;
        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = Some(kind);
        self.set_state(ConnectionState::Connected);

        Session {
            outbound,
            pumps: pumps.drop_guard(),
            link: tasks,
        }
    }

    /// Decides what happens after a session's read pump stops.
    async fn session_ended(self: &Arc<Self>, end: SessionEnd) {
        let hub = self.options.hub.as_str();
        if end == SessionEnd::Cancelled || self.is_stopping() {
            return;
        }

        let old = self.session.lock().await.take();
        if let Some(old) = old
            && let Err(e) = old.close().await
        {
            debug!(hub, error = %e, "error closing dropped session");
        }
        self.pending.fail_all(|| ClientError::Closed);

        if self.is_stopping() {
            return;
        }

        match end {
            SessionEnd::ServerClosed {
                error,
                allow_reconnect: false,
            } => {
                warn!(hub, error = ?error, "server closed the connection");
                self.finish(error);
            }
            SessionEnd::ServerClosed { error, .. } => {
                let reason = error.unwrap_or_else(|| "server closed the connection".into());
                if self.enter_reconnecting(0) {
                    tokio::spawn(reconnect_loop(Arc::downgrade(self), reason));
                }
            }
            SessionEnd::Dropped(reason) => {
                if self.enter_reconnecting(0) {
                    tokio::spawn(reconnect_loop(Arc::downgrade(self), reason));
                }
            }
            SessionEnd::Cancelled => {}
        }
    }

    /// Moves to the terminal closed state and fires close callbacks once.
    pub(crate) fn finish(&self, error: Option<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lifetime.cancel();
        self.set_state(ConnectionState::Disconnected);

        let callbacks: Vec<CloseCallback> = self
            .close_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for callback in callbacks {
            callback(error.clone());
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
