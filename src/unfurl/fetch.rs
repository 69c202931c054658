//! Bounded fetcher: HEAD pre-check, pinned connections, capped body reads.

use anyhow::Context;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_LENGTH, LOCATION};
use reqwest::{redirect, Client, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;
use url::{Host, Url};

use super::gate::{SafetyGate, Target};
use crate::config::UnfurlConfig;
use crate::error::UnfurlError;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml";

/// Outcome of the HEAD pre-flight for one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadProbe {
    Ok { content_length: Option<u64> },
    /// Server refuses HEAD (405/501); go straight to GET.
    MethodNotAllowed,
}

/// Bounded HTML body and the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub html: String,
}

pub struct Fetcher {
    timeout: Duration,
    max_body_bytes: u64,
    max_redirects: usize,
    user_agent: String,
}

impl Fetcher {
    pub fn new(config: &UnfurlConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_body_bytes: config.max_body_bytes,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Fetch a gated target, following redirects through `gate`.
    pub async fn fetch(
        &self,
        gate: &SafetyGate,
        target: Target,
    ) -> Result<FetchedPage, UnfurlError> {
        let mut target = target;
        let mut redirects = 0;

        loop {
            let client = self.client_for(&target)?;

            match self.probe(&client, &target.url).await? {
                HeadProbe::Ok {
                    content_length: Some(len),
                } if len > self.max_body_bytes => {
                    debug!("HEAD for {} declares {} bytes", target.url, len);
                    return Err(UnfurlError::TooLarge);
                }
                HeadProbe::Ok { .. } => {}
                HeadProbe::MethodNotAllowed => {
                    debug!("HEAD refused by {}, falling back to GET", target.host);
                }
            }

            let response = client
                .get(target.url.clone())
                .header(ACCEPT, ACCEPT_HTML)
                .send()
                .await?;
            let status = response.status();

            if status.is_redirection() {
                let Some(location) = redirect_location(response.headers()) else {
                    return Err(UnfurlError::Upstream(StatusCode::BAD_GATEWAY));
                };
                if redirects >= self.max_redirects {
                    return Err(UnfurlError::TooManyRedirects);
                }
                redirects += 1;

                let next = target
                    .url
                    .join(&location)
                    .map_err(|e| UnfurlError::InvalidUrl(e.to_string()))?;
                debug!("Redirect {} -> {}", target.url, next);
                target = gate.check_url(next).await?;
                continue;
            }

            if !status.is_success() {
                return Err(UnfurlError::Upstream(status));
            }

            if declared_length(response.headers()).is_some_and(|len| len > self.max_body_bytes) {
                return Err(UnfurlError::TooLarge);
            }

            let body = read_capped(response.bytes_stream(), self.max_body_bytes).await?;

            return Ok(FetchedPage {
                final_url: target.url,
                html: String::from_utf8_lossy(&body).into_owned(),
            });
        }
    }

    async fn probe(&self, client: &Client, url: &Url) -> Result<HeadProbe, UnfurlError> {
        let response = client
            .head(url.clone())
            .header(ACCEPT, ACCEPT_HTML)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            return Ok(HeadProbe::MethodNotAllowed);
        }
        if status.is_success() {
            return Ok(HeadProbe::Ok {
                content_length: declared_length(response.headers()),
            });
        }
        if status.is_redirection() {
            return Ok(HeadProbe::Ok {
                content_length: None,
            });
        }
        Err(UnfurlError::Upstream(status))
    }

    /// One client per hop, its DNS pinned to the addresses the gate approved.
    fn client_for(&self, target: &Target) -> Result<Client, UnfurlError> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .redirect(redirect::Policy::none())
            .no_proxy();

        if let Some(Host::Domain(domain)) = target.url.host() {
            let port = target.url.port_or_known_default().unwrap_or(0);
            let addrs: Vec<SocketAddr> = target
                .addrs
                .iter()
                .map(|ip| SocketAddr::new(*ip, port))
                .collect();
            builder = builder.resolve_to_addrs(domain, &addrs);
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(client)
    }
}

/// `Content-Length` as declared by the server. The body size hint is useless
/// for HEAD responses, so the header is read directly.
fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn redirect_location(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Drain a chunk stream, failing as soon as more than `limit` bytes arrive.
///
/// Returning early drops the stream, which aborts the underlying connection.
pub async fn read_capped<S, B, E>(stream: S, limit: u64) -> Result<Vec<u8>, UnfurlError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<UnfurlError>,
{
    futures::pin_mut!(stream);
    let mut body = Vec::new();
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        let chunk = chunk.as_ref();
        received += chunk.len() as u64;
        if received > limit {
            debug!("Body exceeded {} bytes, aborting read", limit);
            return Err(UnfurlError::TooLarge);
        }
        body.extend_from_slice(chunk);
    }

    Ok(body)
}
