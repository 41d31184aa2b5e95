//! Initial-connect retry loop with exponential backoff.
//!
//! Distinct from automatic reconnect: this only runs until the first
//! successful connect, and a stop request aborts it through the
//! cancellation token stored in the registry slot.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectOptions, Connector};
use crate::error::{ClientError, HubError};
use crate::types::{ConnectionEvent, RetryConfig};

/// Attempts to connect up to `retry.max_attempts` times.
///
/// After failed attempt `n` waits `base_delay × 2^(n-1)`; there is no wait
/// after the last attempt. Non-transient failures end the loop immediately.
pub(crate) async fn connect_with_retry<K: Connector>(
    connector: &K,
    options: &ConnectOptions,
    retry: &RetryConfig,
    cancel: &CancellationToken,
    events: &mpsc::Sender<ConnectionEvent>,
) -> Result<K::Connection, HubError> {
    let hub = options.hub.as_str();
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(HubError::Cancelled { hub: hub.into() });
        }

        debug!(hub, attempt, max_attempts, "connect attempt");
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(hub, attempt, "connect cancelled mid-attempt");
                return Err(HubError::Cancelled { hub: hub.into() });
            }
            r = connector.connect(options) => r,
        };

        let error = match result {
            Ok(conn) => {
                info!(hub, attempt, "connected");
                return Ok(conn);
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            warn!(hub, attempt, error = %error, "connect failed permanently");
            return Err(match error {
                ClientError::Unauthorized => {
                    HubError::Authentication { hub: hub.into() }
                }
                source => HubError::Connection {
                    hub: hub.into(),
                    attempts: attempt,
                    source,
                },
            });
        }

        if attempt >= max_attempts {
            warn!(hub, attempts = attempt, error = %error, "connect attempts exhausted");
            return Err(HubError::Connection {
                hub: hub.into(),
                attempts: attempt,
                source: error,
            });
        }

        let delay = retry.delay_for_attempt(attempt);
        warn!(
            hub,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "connect attempt failed, retrying"
        );
        let _ = events.try_send(ConnectionEvent::Retrying {
            hub: hub.into(),
            attempt,
            delay,
            error: error.to_string(),
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(hub, "retry cancelled");
                return Err(HubError::Cancelled { hub: hub.into() });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
