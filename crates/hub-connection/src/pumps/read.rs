//! Read pump: parses inbound frames and dispatches them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use cowork_protocol::constants::SERVER_TIMEOUT;
use cowork_protocol::{FrameBuffer, Message, MessageType};

use crate::handlers::{HandlerTable, PendingInvocations};

/// Why a session's read pump stopped.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEnd {
    /// The session was closed locally.
    Cancelled,
    /// The server sent a close message.
    ServerClosed {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// The transport died or went silent.
    Dropped(String),
}

/// Where inbound frames are routed.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub(crate) hub: String,
    pub(crate) handlers: Arc<HandlerTable>,
    pub(crate) pending: Arc<PendingInvocations>,
}

/// Reads payloads from the transport until the session ends.
///
/// Any inbound payload resets the server timeout; if nothing arrives within
/// [`SERVER_TIMEOUT`] the connection is considered dead.
pub(crate) async fn read_pump(
    mut inbound: mpsc::Receiver<String>,
    mut buffer: FrameBuffer,
    leftover: Vec<String>,
    dispatch: Dispatch,
    cancel: CancellationToken,
) -> SessionEnd {
    let hub = dispatch.hub.as_str();
    for frame in &leftover {
        if let Some(end) = handle_frame(frame, &dispatch) {
            return end;
        }
    }

    let deadline = tokio::time::sleep(SERVER_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,

            () = &mut deadline => {
                warn!(hub, "server timeout, connection considered dead");
                return SessionEnd::Dropped(format!(
                    "server timeout elapsed without receiving a message ({}s)",
                    SERVER_TIMEOUT.as_secs()
                ));
            }

            payload = inbound.recv() => {
                let Some(payload) = payload else {
                    debug!(hub, "transport closed");
                    return SessionEnd::Dropped("transport closed".into());
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + SERVER_TIMEOUT);

                let frames = match buffer.push(&payload) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(hub, error = %e, "dropping unreadable payload");
                        continue;
                    }
                };
                for frame in &frames {
                    if let Some(end) = handle_frame(frame, &dispatch) {
                        return end;
                    }
                }
            }
        }
    }
}

/// Handles one frame. Returns the session end for close messages.
fn handle_frame(frame: &str, dispatch: &Dispatch) -> Option<SessionEnd> {
    let hub = dispatch.hub.as_str();
    let msg: Message = match serde_json::from_str(frame) {
        Ok(m) => m,
        Err(e) => {
            warn!(hub, "failed to parse message: {e}");
            return None;
        }
    };

    trace!(hub, msg_type = ?msg.msg_type, "received message");

    match msg.msg_type {
        MessageType::Invocation => {
            let Some(target) = msg.target.as_deref() else {
                warn!(hub, "invocation without target");
                return None;
            };
            if msg.invocation_id.is_some() {
                debug!(hub, target, "server expects a result, which is not supported");
            }
            dispatch.handlers.dispatch(target, msg.args());
        }
        MessageType::Completion => {
            dispatch.pending.complete(&msg);
        }
        MessageType::Ping => trace!(hub, "received keep-alive"),
        MessageType::Close => {
            let allow_reconnect = msg.allow_reconnect.unwrap_or(false);
            debug!(hub, error = ?msg.error, allow_reconnect, "server sent close");
            return Some(SessionEnd::ServerClosed {
                error: msg.error,
                allow_reconnect,
            });
        }
        other => debug!(hub, msg_type = ?other, "ignoring message"),
    }
    None
}
