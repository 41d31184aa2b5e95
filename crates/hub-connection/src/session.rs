//! One transport session: negotiate, transport start and protocol handshake.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use tracing::debug;

use cowork_protocol::constants::HANDSHAKE_TIMEOUT;
use cowork_protocol::framing::write_frame;
use cowork_protocol::{FrameBuffer, HandshakeRequest, HandshakeResponse, Message};

use crate::error::ClientError;
use crate::negotiate::negotiate;
use crate::transport::{self, LinkTasks, TransportLink};

/// A transport that completed the handshake.
pub(crate) struct Established {
    pub(crate) connection_id: Option<String>,
    pub(crate) link: TransportLink,
    /// Partial frame data received after the handshake response.
    pub(crate) buffer: FrameBuffer,
    /// Complete frames received in the same payload as the handshake response.
    pub(crate) leftover: Vec<String>,
}

/// A running session: transport plus the pumps reading and pinging it.
pub(crate) struct Session {
    pub(crate) outbound: mpsc::Sender<String>,
    /// Stops the read and ping pumps when dropped.
    pub(crate) pumps: DropGuard,
    pub(crate) link: LinkTasks,
}

pub(crate) type EstablishFuture =
    Pin<Box<dyn Future<Output = Result<Established, ClientError>> + Send>>;

/// Opens a fresh session with the given access token.
///
/// Hub clients reconnect through this.
pub(crate) type Establisher = Arc<dyn Fn(String) -> EstablishFuture + Send + Sync>;

/// Establishes sessions over HTTP negotiate and the negotiated transport.
pub(crate) fn http_establisher(http: reqwest::Client, hub_url: String) -> Establisher {
    Arc::new(move |token: String| -> EstablishFuture {
        let http = http.clone();
        let hub_url = hub_url.clone();
        Box::pin(async move { establish(&http, &hub_url, &token).await })
    })
}

impl Session {
    /// Queues the protocol close message so the transport flushes it before
    /// shutting down.
    pub(crate) fn send_close(&self) {
        let frame = match write_frame(&Message::close(None, false)) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "failed to encode close message");
                return;
            }
        };
        if self.outbound.try_send(frame).is_err() {
            debug!("transport gone or saturated, close message not sent");
        }
    }

    /// Stops the pumps first so the read pump reports a local close, then
    /// shuts the transport down.
    pub(crate) async fn close(self) -> Result<(), ClientError> {
        drop(self.pumps);
        self.link.shutdown().await
    }
}

/// Negotiates, starts a transport and completes the handshake.
pub(crate) async fn establish(
    http: &reqwest::Client,
    hub_url: &str,
    access_token: &str,
) -> Result<Established, ClientError> {
    let negotiated = negotiate(http, hub_url, access_token).await?;
    let connection_id = negotiated.response.connection_id.clone();

    let mut link = transport::start(http, &negotiated).await?;
    let (buffer, leftover) = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut link)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("handshake timed out");
            return Err(ClientError::Timeout);
        }
    };

    debug!(connection_id = ?connection_id, transport = %link.kind, "handshake complete");
    Ok(Established {
        connection_id,
        link,
        buffer,
        leftover,
    })
}

/// Sends the handshake request and waits for the server's answer.
pub(crate) async fn handshake(
    link: &mut TransportLink,
) -> Result<(FrameBuffer, Vec<String>), ClientError> {
    let request = write_frame(&HandshakeRequest::json())?;
    link.outbound
        .send(request)
        .await
        .map_err(|_| ClientError::Closed)?;

    let mut buffer = FrameBuffer::default();
    loop {
        let Some(payload) = link.inbound.recv().await else {
            return Err(ClientError::Closed);
        };
        let mut frames = buffer.push(&payload)?;
        if frames.is_empty() {
            continue;
        }

        let first = frames.remove(0);
        let response: HandshakeResponse = serde_json::from_str(&first)?;
        if let Some(error) = response.rejection() {
            return Err(ClientError::Handshake(error.to_string()));
        }
        return Ok((buffer, frames));
    }
}
