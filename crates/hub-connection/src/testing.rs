//! Test doubles: in-memory connections and sessions, and a scripted HTTP
//! server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cowork_protocol::FrameBuffer;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::HubClient;
use crate::connection::{ConnectOptions, Connector, HubConnection};
use crate::error::ClientError;
use crate::session::{EstablishFuture, Established, Establisher};
use crate::transport::{ServerEnd, TransportLink};
use crate::types::{
    CloseCallback, ConnectionEvent, ConnectionState, EventHandler, ReconnectPolicy,
};

type ErrorFactory = Box<dyn Fn() -> ClientError + Send + Sync>;

/// Connector whose first `fail_first` attempts fail.
pub(crate) struct MockConnector {
    attempts: AtomicU32,
    fail_first: u32,
    error: ErrorFactory,
    delay: Duration,
    fail_stop: bool,
    tokens: Mutex<Vec<String>>,
}

impl MockConnector {
    pub(crate) fn healthy() -> Self {
        Self::failing_times(0)
    }

    pub(crate) fn failing_times(n: u32) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            fail_first: n,
            error: Box::new(|| ClientError::Closed),
            delay: Duration::ZERO,
            fail_stop: false,
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    pub(crate) fn failing_with(error: impl Fn() -> ClientError + Send + Sync + 'static) -> Self {
        Self {
            error: Box::new(error),
            ..Self::always_failing()
        }
    }

    /// Each connect attempt takes `delay` before resolving.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Connections produced by this connector fail to stop cleanly.
    pub(crate) fn with_failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Tokens observed on each attempt.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, options: &ConnectOptions) -> Result<MockConnection, ClientError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.tokens.lock().unwrap().push((options.access_token)());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if attempt <= self.fail_first {
            return Err((self.error)());
        }
        Ok(MockConnection::new(format!("conn-{attempt}"), self.fail_stop))
    }
}

/// Connection double: records invocations and lets tests push events.
pub(crate) struct MockConnection {
    id: String,
    state: Mutex<ConnectionState>,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    close_callbacks: Mutex<Vec<CloseCallback>>,
    closed: AtomicBool,
    fail_stop: bool,
    pub(crate) invocations: Mutex<Vec<(String, Vec<Value>)>>,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl MockConnection {
    pub(crate) fn new(id: String, fail_stop: bool) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState::Connected),
            handlers: Mutex::new(HashMap::new()),
            close_callbacks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_stop,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Simulates a server push of `event`.
    pub(crate) fn push(&self, event: &str, args: &[Value]) {
        let handlers = self
            .handlers
            .lock()
            .unwrap()
            .get(&event.to_lowercase())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(args);
        }
    }

    /// Simulates an unrecoverable drop reported by the transport.
    pub(crate) fn drop_connection(&self, error: &str) {
        self.finish(Some(error.to_string()));
    }

    pub(crate) fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .get(&event.to_lowercase())
            .map_or(0, Vec::len)
    }

    fn finish(&self, error: Option<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        let callbacks: Vec<CloseCallback> = self.close_callbacks.lock().unwrap().drain(..).collect();
        for cb in callbacks {
            cb(error.clone());
        }
    }
}

impl HubConnection for MockConnection {
    fn state(&self) -> ConnectionState {
        self.state.lock().unwrap().clone()
    }

    fn connection_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn on_event(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(event.to_lowercase())
            .or_default()
            .push(handler);
    }

    fn off_event(&self, event: &str) {
        self.handlers.lock().unwrap().remove(&event.to_lowercase());
    }

    fn on_close(&self, callback: CloseCallback) {
        if self.closed.load(Ordering::SeqCst) {
            callback(None);
            return;
        }
        self.close_callbacks.lock().unwrap().push(callback);
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        if !self.state().is_connected() {
            return Err(ClientError::Closed);
        }
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), args.clone()));
        if method == "Fail" {
            return Err(ClientError::Server("method failed".into()));
        }
        Ok(Value::Array(args))
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), ClientError> {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), args));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Closing);
        self.finish(None);
        if self.fail_stop {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

/// Connect options for `hub` with an event receiver.
pub(crate) fn test_options(hub: &str) -> (ConnectOptions, mpsc::Receiver<ConnectionEvent>) {
    let (events, rx) = mpsc::channel(64);
    let options = ConnectOptions {
        hub: hub.to_string(),
        url: format!("http://localhost/hubs/{hub}"),
        access_token: Arc::new(|| "test-token".to_string()),
        reconnect: ReconnectPolicy::default(),
        events,
    };
    (options, rx)
}

/// Reconnect backoff short enough for real-time tests.
pub(crate) fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay_ms: 10,
        max_delay_ms: 40,
    }
}

/// Polls `condition` until it holds, failing the test after about a second.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn established(link: TransportLink, connection_id: &str) -> Established {
    Established {
        connection_id: Some(connection_id.to_string()),
        link,
        buffer: FrameBuffer::default(),
        leftover: Vec::new(),
    }
}

/// Observes sessions opened by [`memory_establisher`].
pub(crate) struct MemoryServer {
    /// Server end of every session opened so far.
    pub(crate) ends: mpsc::UnboundedReceiver<ServerEnd>,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl MemoryServer {
    /// Tokens passed to each establish attempt.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

/// Establisher handing out in-memory sessions.
///
/// Each attempt takes the next scripted outcome: `Ok(id)` opens a session with
/// that connection id, `Err` fails the attempt. Once the script is used up
/// every attempt fails with [`ClientError::Closed`].
pub(crate) fn memory_establisher(
    script: Vec<Result<&str, ClientError>>,
) -> (Establisher, MemoryServer) {
    let script: VecDeque<Result<String, ClientError>> = script
        .into_iter()
        .map(|outcome| outcome.map(str::to_string))
        .collect();
    let script = Arc::new(Mutex::new(script));
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let (ends_tx, ends) = mpsc::unbounded_channel();

    let seen = tokens.clone();
    let establish: Establisher = Arc::new(move |token: String| -> EstablishFuture {
        seen.lock().unwrap().push(token);
        let next = script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ClientError::Closed));
        let ends_tx = ends_tx.clone();
        Box::pin(async move {
            let id = next?;
            let (link, server) = TransportLink::in_memory();
            let _ = ends_tx.send(server);
            Ok::<_, ClientError>(established(link, &id))
        })
    });
    (establish, MemoryServer { ends, tokens })
}

/// A connected hub client over an in-memory session `conn-1`, reconnecting
/// through `reconnects`.
pub(crate) async fn memory_client(
    options: ConnectOptions,
    reconnects: Vec<Result<&str, ClientError>>,
) -> (HubClient, ServerEnd, MemoryServer) {
    let (link, server) = TransportLink::in_memory();
    let (establish, memory) = memory_establisher(reconnects);
    let client = HubClient::start(establish, options, established(link, "conn-1")).await;
    (client, server, memory)
}

/// Connector producing real hub clients over in-memory sessions.
///
/// The server end of each initial session is sent to the test. Reconnect
/// attempts fail with `reconnect_error`.
pub(crate) struct MemoryConnector {
    reconnect_error: fn() -> ClientError,
    ends: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryConnector {
    pub(crate) fn new(
        reconnect_error: fn() -> ClientError,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (ends, rx) = mpsc::unbounded_channel();
        (
            Self {
                reconnect_error,
                ends,
            },
            rx,
        )
    }
}

impl Connector for MemoryConnector {
    type Connection = HubClient;

    async fn connect(&self, options: &ConnectOptions) -> Result<HubClient, ClientError> {
        let (link, server) = TransportLink::in_memory();
        let _ = self.ends.send(server);
        let error = self.reconnect_error;
        let establish: Establisher =
            Arc::new(move |_token: String| -> EstablishFuture { Box::pin(async move { Err::<Established, _>(error()) }) });
        Ok(HubClient::start(establish, options.clone(), established(link, "conn-1")).await)
    }
}

/// A request received by [`MockHttp`].
#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub(crate) method: String,
    /// Path and query.
    pub(crate) target: String,
    /// Header names are lowercase.
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: String,
}

impl SeenRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted response.
pub(crate) struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
    hang: bool,
}

impl Reply {
    pub(crate) fn json(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.to_string(),
            hang: false,
        }
    }

    pub(crate) fn text(body: &str) -> Self {
        Self {
            content_type: "text/plain",
            ..Self::json(body)
        }
    }

    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::text("")
        }
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Never answers; the connection stays open.
    pub(crate) fn hang() -> Self {
        Self {
            hang: true,
            ..Self::status(200)
        }
    }
}

/// HTTP/1.1 server answering every request from a routing closure, one
/// request per connection.
pub(crate) struct MockHttp {
    /// Base URL, `http://127.0.0.1:<port>`.
    pub(crate) url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    handle: JoinHandle<()>,
}

impl MockHttp {
    pub(crate) async fn start<F>(route: F) -> Self
    where
        F: Fn(&SeenRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let route = Arc::new(route);

        let handle = {
            let seen = seen.clone();
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let seen = seen.clone();
                    let route = route.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut stream).await else {
                            return;
                        };
                        let reply = route(&request);
                        seen.lock().unwrap().push(request);
                        if reply.hang {
                            std::future::pending::<()>().await;
                        }

                        let head = format!(
                            "HTTP/1.1 {} Mock\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            reply.status,
                            reply.content_type,
                            reply.body.len()
                        );
                        let _ = stream.write_all(head.as_bytes()).await;
                        let _ = stream.write_all(reply.body.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    });
                }
            })
        };

        Self { url, seen, handle }
    }

    /// Requests received so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn requests_with(&self, method: &str) -> Vec<SeenRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

impl Drop for MockHttp {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(SeenRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
