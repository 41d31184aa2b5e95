//! WebSocket write pump: serialises outbound payloads onto the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Writes payloads and control frames to the WebSocket.
///
/// On cancellation, payloads already queued are flushed before the close
/// frame.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut text_rx: mpsc::Receiver<String>,
    mut control_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                while let Ok(text) = text_rx.try_recv() {
                    if write.send(tungstenite::Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                break;
            }
            Some(control) = control_rx.recv() => {
                if let Err(e) = write.send(control).await {
                    error!("WebSocket write error: {e}");
                    break;
                }
            }
            msg = text_rx.recv() => {
                match msg {
                    Some(text) => {
                        if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                            error!("WebSocket write error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
    cancel.cancel();
}
