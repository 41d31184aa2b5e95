//! Transports carrying hub protocol text between client and server.
//!
//! Every transport is reduced to a [`TransportLink`]: an outbound channel of
//! payloads to send, an inbound channel of payloads received, and the tasks
//! driving the underlying connection. A closed inbound channel means the
//! transport is gone.

pub(crate) mod long_polling;
pub(crate) mod sse;
pub(crate) mod websocket;

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cowork_protocol::TransportType;
use cowork_protocol::constants::CLOSE_TIMEOUT;

use crate::error::ClientError;
use crate::negotiate::Negotiated;

/// Channel capacity for payloads in either direction.
pub(crate) const LINK_BUFFER: usize = 256;

/// An open transport.
pub(crate) struct TransportLink {
    pub(crate) kind: TransportType,
    pub(crate) outbound: mpsc::Sender<String>,
    pub(crate) inbound: mpsc::Receiver<String>,
    pub(crate) tasks: LinkTasks,
}

/// Tasks driving one transport. Dropping aborts them.
pub(crate) struct LinkTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl LinkTasks {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Stops the transport, giving its tasks [`CLOSE_TIMEOUT`] to say goodbye.
    pub(crate) async fn shutdown(self) -> Result<(), ClientError> {
        self.shutdown_within(CLOSE_TIMEOUT).await
    }

    async fn shutdown_within(mut self, grace: Duration) -> Result<(), ClientError> {
        self.cancel.cancel();
        let handles = std::mem::take(&mut self.handles);
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let joined = tokio::time::timeout(grace, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;

        if joined.is_err() {
            warn!("transport did not close in time, aborting");
            for abort in aborts {
                abort.abort();
            }
            return Err(ClientError::Timeout);
        }
        Ok(())
    }
}

impl Drop for LinkTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Starts the first transport the server offers, in preference order.
///
/// A transport that fails to start falls back to the next one.
pub(crate) async fn start(
    http: &reqwest::Client,
    negotiated: &Negotiated,
) -> Result<TransportLink, ClientError> {
    let url = negotiated.connection_url()?;
    let token = negotiated.access_token.as_str();
    let candidates = negotiated.response.preferred_transports();
    if candidates.is_empty() {
        return Err(ClientError::NoTransport);
    }

    let mut last_error = None;
    for kind in candidates {
        debug!(transport = %kind, "starting transport");
        let result = match kind {
            TransportType::WebSockets => websocket::connect(&url, token).await,
            TransportType::ServerSentEvents => sse::connect(http, &url, token).await,
            TransportType::LongPolling => long_polling::connect(http, &url, token).await,
            TransportType::Unknown => continue,
        };
        match result {
            Ok(link) => {
                info!(transport = %kind, "transport started");
                return Ok(link);
            }
            Err(ClientError::Unauthorized) => return Err(ClientError::Unauthorized),
            Err(e) => {
                warn!(transport = %kind, error = %e, "transport failed to start, trying next");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(ClientError::NoTransport))
}

/// Adds the bearer token, if there is one.
pub(crate) fn authorize(request: RequestBuilder, token: &str) -> RequestBuilder {
    if token.is_empty() {
        request
    } else {
        request.bearer_auth(token)
    }
}

/// Maps auth failures and non-2xx statuses to errors.
pub(crate) async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ClientError::Unauthorized);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Sends one payload over HTTP, as the SSE and long polling transports do.
pub(crate) async fn post_payload(
    http: &reqwest::Client,
    url: &Url,
    token: &str,
    payload: String,
) -> Result<(), ClientError> {
    let request = authorize(http.post(url.clone()), token)
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(payload);
    check_status(request.send().await?).await?;
    Ok(())
}

/// Forwards outbound payloads with HTTP POSTs until cancelled.
///
/// Payloads already queued when the link is cancelled are still sent. A
/// failed send cancels the link.
pub(crate) async fn send_loop(
    http: reqwest::Client,
    url: Url,
    token: String,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = post_payload(&http, &url, &token, payload).await {
                    warn!(error = %e, "failed to send payload");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    cancel.cancel();
}

/// Server end of an in-memory link.
#[cfg(test)]
pub(crate) struct ServerEnd {
    pub(crate) to_client: mpsc::Sender<String>,
    pub(crate) from_client: mpsc::Receiver<String>,
}

#[cfg(test)]
impl TransportLink {
    /// A link backed by plain channels.
    pub(crate) fn in_memory() -> (Self, ServerEnd) {
        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        let link = Self {
            kind: TransportType::WebSockets,
            outbound: out_tx,
            inbound: in_rx,
            tasks: LinkTasks::new(CancellationToken::new()),
        };
        let server = ServerEnd {
            to_client: in_tx,
            from_client: out_rx,
        };
        (link, server)
    }
}
