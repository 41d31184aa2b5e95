//! Negotiate request: discovers the connection token and offered transports.

use reqwest::Url;
use tracing::{debug, trace};

use cowork_protocol::NegotiateResponse;
use cowork_protocol::constants::{MAX_NEGOTIATE_REDIRECTS, NEGOTIATE_VERSION};

use crate::error::ClientError;
use crate::transport::{authorize, check_status};

/// Outcome of a negotiate, after following redirects.
#[derive(Debug, Clone)]
pub(crate) struct Negotiated {
    /// Hub URL the transport connects to (may differ after a redirect).
    pub(crate) url: String,
    /// Token to present to the transport.
    pub(crate) access_token: String,
    pub(crate) response: NegotiateResponse,
}

impl Negotiated {
    /// Hub URL with the `id` query parameter appended.
    pub(crate) fn connection_url(&self) -> Result<Url, ClientError> {
        let mut url = parse(&self.url)?;
        if let Some(key) = self.response.connection_key() {
            url.query_pairs_mut().append_pair("id", key);
        }
        Ok(url)
    }
}

/// What a single negotiate response asks us to do next.
#[derive(Debug)]
enum Step {
    Redirect { url: String, access_token: Option<String> },
    Done(NegotiateResponse),
}

fn parse(url: &str) -> Result<Url, ClientError> {
    Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))
}

/// Builds `{hub_url}/negotiate?negotiateVersion=1`, keeping existing query
/// parameters.
pub(crate) fn negotiate_url(hub_url: &str) -> Result<Url, ClientError> {
    let mut url = parse(hub_url)?;
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .append_pair("negotiateVersion", &NEGOTIATE_VERSION.to_string());
    Ok(url)
}

fn interpret(response: NegotiateResponse) -> Result<Step, ClientError> {
    if let Some(error) = response.error.as_deref().filter(|e| !e.is_empty()) {
        return Err(ClientError::Negotiate(error.to_string()));
    }
    if response.is_redirect() {
        return Ok(Step::Redirect {
            url: response.url.unwrap_or_default(),
            access_token: response.access_token,
        });
    }
    if response.negotiate_version >= 1 && response.connection_token.is_none() {
        return Err(ClientError::Negotiate(
            "response is missing the connection token".into(),
        ));
    }
    Ok(Step::Done(response))
}

/// Negotiates with the hub at `hub_url`, following redirects.
pub(crate) async fn negotiate(
    http: &reqwest::Client,
    hub_url: &str,
    access_token: &str,
) -> Result<Negotiated, ClientError> {
    let mut url = hub_url.to_string();
    let mut token = access_token.to_string();

    for redirect in 0..=MAX_NEGOTIATE_REDIRECTS {
        let endpoint = negotiate_url(&url)?;
        debug!(url = %endpoint, redirect, "negotiating");

        let resp = check_status(authorize(http.post(endpoint), &token).send().await?).await?;
        let body = resp.text().await?;
        trace!(body = %body, "negotiate response");
        let response: NegotiateResponse = serde_json::from_str(&body)?;

        match interpret(response)? {
            Step::Done(response) => {
                return Ok(Negotiated {
                    url,
                    access_token: token,
                    response,
                });
            }
            Step::Redirect {
                url: next,
                access_token,
            } => {
                debug!(from = %url, to = %next, "negotiate redirected");
                url = next;
                if let Some(t) = access_token {
                    token = t;
                }
            }
        }
    }

    Err(ClientError::Negotiate(format!(
        "exceeded {MAX_NEGOTIATE_REDIRECTS} negotiate redirects"
    )))
}
