//! Automatic reconnection after an established session drops.

use std::pin::Pin;
use std::sync::Weak;

use tracing::{debug, info, warn};

use crate::client::ClientInner;
use crate::error::ClientError;
use crate::types::ConnectionEvent;

/// Reconnection loop with exponential backoff.
///
/// Runs until a new session is installed, the client is stopped, or the
/// server rejects the access token. Returns a boxed future to break the
/// recursive type cycle with the read pump, which spawns this loop.
pub(crate) fn reconnect_loop(
    client: Weak<ClientInner>,
    reason: String,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(inner) = client.upgrade() else {
            return;
        };
        let hub = inner.options.hub.clone();
        let policy = inner.options.reconnect.clone();
        let events = inner.options.events.clone();
        let lifetime = inner.lifetime.clone();
        drop(inner);

        warn!(hub = %hub, reason = %reason, "connection lost, reconnecting");

        let mut attempt: u32 = 0;
        loop {
            let delay = policy.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);

            let Some(inner) = client.upgrade() else {
                return;
            };
            if !inner.enter_reconnecting(attempt) {
                debug!(hub = %hub, "client closed, abandoning reconnect");
                return;
            }
            drop(inner);

            let _ = events.try_send(ConnectionEvent::Reconnecting {
                hub: hub.clone(),
                attempt,
                next_retry_ms: delay.as_millis() as u64,
            });
            info!(
                hub = %hub,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );

            // Wait for the backoff delay (or cancellation).
            tokio::select! {
                _ = lifetime.cancelled() => {
                    debug!(hub = %hub, "reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(inner) = client.upgrade() else {
                return;
            };
            let token = (inner.options.access_token)();
            let establish = (inner.establish)(token);
            drop(inner);

            let result = tokio::select! {
                _ = lifetime.cancelled() => {
                    debug!(hub = %hub, "reconnect cancelled");
                    return;
                }
                r = establish => r,
            };
            let Some(inner) = client.upgrade() else {
                return;
            };

            match result {
                Ok(established) => {
                    let mut slot = inner.session.lock().await;
                    if lifetime.is_cancelled() {
                        // Stopped while the handshake completed.
                        drop(slot);
                        let _ = established.link.tasks.shutdown().await;
                        return;
                    }
                    *slot = Some(inner.install(established));
                    drop(slot);

                    let connection_id = inner.connection_id();
                    info!(hub = %hub, attempt, connection_id = ?connection_id, "reconnected");
                    let _ = events.try_send(ConnectionEvent::Reconnected {
                        hub: hub.clone(),
                        connection_id,
                    });
                    return;
                }
                Err(ClientError::Unauthorized) => {
                    warn!(hub = %hub, attempt, "access token rejected, giving up on reconnect");
                    inner.finish(Some(ClientError::Unauthorized.to_string()));
                    return;
                }
                Err(e) => {
                    warn!(
                        hub = %hub,
                        attempt,
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }
        }
    })
}
