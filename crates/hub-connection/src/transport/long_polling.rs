//! Long polling transport: receive with repeated GETs, send via POST.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use cowork_protocol::TransportType;
use cowork_protocol::constants::LONG_POLL_TIMEOUT;

use super::{LINK_BUFFER, LinkTasks, TransportLink, authorize, check_status, send_loop};
use crate::error::ClientError;

/// Result of one poll request.
#[derive(Debug, PartialEq)]
enum Poll {
    Data(String),
    /// The poll timed out without data.
    Empty,
    /// The server ended the connection.
    Closed,
}

async fn poll_once(
    http: &reqwest::Client,
    url: &Url,
    token: &str,
    timeout: Duration,
) -> Result<Poll, ClientError> {
    let request = authorize(http.get(url.clone()), token).timeout(timeout);
    let resp = match request.send().await {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => return Ok(Poll::Empty),
        Err(e) => return Err(e.into()),
    };

    if resp.status() == StatusCode::NO_CONTENT {
        return Ok(Poll::Closed);
    }
    let resp = check_status(resp).await?;
    let body = resp.text().await?;
    Ok(if body.is_empty() {
        Poll::Empty
    } else {
        Poll::Data(body)
    })
}

/// Opens a long polling connection to the hub.
///
/// The first poll returns immediately and confirms the connection id.
pub(crate) async fn connect(
    http: &reqwest::Client,
    url: &Url,
    token: &str,
) -> Result<TransportLink, ClientError> {
    let first = poll_once(http, url, token, LONG_POLL_TIMEOUT).await?;
    if first == Poll::Closed {
        return Err(ClientError::Closed);
    }

    let (out_tx, out_rx) = mpsc::channel::<String>(LINK_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<String>(LINK_BUFFER);
    if let Poll::Data(data) = first {
        let _ = in_tx.try_send(data);
    }
    let cancel = CancellationToken::new();
    let mut tasks = LinkTasks::new(cancel.clone());

    {
        let http = http.clone();
        let url = url.clone();
        let token = token.to_string();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            send_loop(http.clone(), url.clone(), token.clone(), out_rx, cancel).await;
            // Tell the server we are gone.
            match authorize(http.delete(url), &token).send().await {
                Ok(resp) => trace!(status = %resp.status(), "long polling connection deleted"),
                Err(e) => debug!(error = %e, "failed to delete long polling connection"),
            }
        }));
    }

    {
        let http = http.clone();
        let url = url.clone();
        let token = token.to_string();
        tasks.push(tokio::spawn(async move {
            loop {
                let poll = tokio::select! {
                    _ = cancel.cancelled() => break,
                    poll = poll_once(&http, &url, &token, LONG_POLL_TIMEOUT) => poll,
                };
                match poll {
                    Ok(Poll::Data(data)) => {
                        if in_tx.send(data).await.is_err() {
                            break;
                        }
                    }
                    Ok(Poll::Empty) => trace!("poll returned no data"),
                    Ok(Poll::Closed) => {
                        debug!("server closed the long polling connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "poll failed");
                        break;
                    }
                }
            }
            cancel.cancel();
        }));
    }

    Ok(TransportLink {
        kind: TransportType::LongPolling,
        outbound: out_tx,
        inbound: in_rx,
        tasks,
    })
}
