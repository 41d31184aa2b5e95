//! Server-Sent Events transport: receive over an event stream, send via POST.

use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cowork_protocol::TransportType;

use super::{LINK_BUFFER, LinkTasks, TransportLink, authorize, check_status, send_loop};
use crate::error::ClientError;

/// Incremental `text/event-stream` parser yielding each event's data.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    line: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    /// Feeds raw bytes and returns the data of every completed event.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comments (":") and other fields are ignored.
        }
        events
    }
}

/// Opens an event stream to the hub.
pub(crate) async fn connect(
    http: &reqwest::Client,
    url: &Url,
    token: &str,
) -> Result<TransportLink, ClientError> {
    let request = authorize(http.get(url.clone()), token).header(ACCEPT, "text/event-stream");
    let resp = check_status(request.send().await?).await?;
    let stream = resp.bytes_stream();

    let (out_tx, out_rx) = mpsc::channel::<String>(LINK_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<String>(LINK_BUFFER);
    let cancel = CancellationToken::new();

    let mut tasks = LinkTasks::new(cancel.clone());
    tasks.push(tokio::spawn(send_loop(
        http.clone(),
        url.clone(),
        token.to_string(),
        out_rx,
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(async move {
        let mut stream = stream;
        let mut parser = SseParser::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for data in parser.push(&bytes) {
                            if in_tx.send(data).await.is_err() {
                                cancel.cancel();
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("event stream error: {e}");
                        break;
                    }
                    None => {
                        debug!("event stream ended");
                        break;
                    }
                }
            }
        }
        cancel.cancel();
    }));

    Ok(TransportLink {
        kind: TransportType::ServerSentEvents,
        outbound: out_tx,
        inbound: in_rx,
        tasks,
    })
}
