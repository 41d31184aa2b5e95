//! Ping pump: periodic hub protocol keep-alive messages.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use cowork_protocol::Message;
use cowork_protocol::constants::KEEP_ALIVE_INTERVAL;
use cowork_protocol::framing::write_frame;

/// Sends a ping message every [`KEEP_ALIVE_INTERVAL`] so the server does not
/// time the client out.
pub(crate) async fn ping_pump(outbound: mpsc::Sender<String>, cancel: CancellationToken) {
    let ping = match write_frame(&Message::ping()) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("failed to encode ping: {e}");
            return;
        }
    };

    let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if outbound.send(ping.clone()).await.is_err() {
                    break;
                }
            }
        }
    }
}
