//! WebSocket transport.

use futures_util::StreamExt;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use cowork_protocol::TransportType;
use cowork_protocol::constants::MAX_MESSAGE_SIZE;

use super::{LINK_BUFFER, LinkTasks, TransportLink};
use crate::error::ClientError;
use crate::pumps::write::write_pump;

/// Rewrites an `http(s)` connection URL to `ws(s)` and appends the token.
pub(crate) fn websocket_url(url: &Url, token: &str) -> Result<Url, ClientError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {url}"
            )));
        }
    };

    let mut ws = url.clone();
    ws.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(url.to_string()))?;
    if !token.is_empty() {
        ws.query_pairs_mut().append_pair("access_token", token);
    }
    Ok(ws)
}

/// Opens a WebSocket to the hub.
pub(crate) async fn connect(url: &Url, token: &str) -> Result<TransportLink, ClientError> {
    let ws_url = websocket_url(url, token)?;
    let mut request = ws_url.as_str().into_client_request()?;
    if !token.is_empty() {
        let value =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ClientError::Unauthorized)?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);

    let (ws_stream, _) =
        match tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false).await {
            Ok(pair) => pair,
            Err(tungstenite::Error::Http(resp))
                if matches!(resp.status().as_u16(), 401 | 403) =>
            {
                return Err(ClientError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };
    let (write, read) = ws_stream.split();

    let (out_tx, out_rx) = mpsc::channel::<String>(LINK_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<String>(LINK_BUFFER);
    let (control_tx, control_rx) = mpsc::channel::<tungstenite::Message>(16);
    let cancel = CancellationToken::new();

    let mut tasks = LinkTasks::new(cancel.clone());
    tasks.push(tokio::spawn(write_pump(
        write,
        out_rx,
        control_rx,
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(socket_reader(read, in_tx, control_tx, cancel)));

    Ok(TransportLink {
        kind: TransportType::WebSockets,
        outbound: out_tx,
        inbound: in_rx,
        tasks,
    })
}

/// Forwards text messages from the socket to the inbound channel.
async fn socket_reader<S>(
    mut read: S,
    inbound: mpsc::Sender<String>,
    control: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if inbound.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        match String::from_utf8(data.to_vec()) {
                            Ok(text) => {
                                if inbound.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => warn!("dropping non-UTF-8 binary message"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        trace!("received ping, sending pong");
                        let _ = control.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(frame = ?frame, "received close frame");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }
    cancel.cancel();
}
