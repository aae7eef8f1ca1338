use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Proxy, StatusCode};
use thiserror::Error;
use tracing::debug;

/// Headers that belong to the proxy hop, not the upstream request.
/// `accept-encoding` is stripped so the client negotiates compression
/// itself and bodies arrive decoded, ready for the rewrite pipeline.
const HOP_BY_HOP_REQUEST_HEADERS: &[&str] = &[
    "accept-encoding",
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "transfer-encoding",
    "upgrade",
];

/// Fetches proxied requests from the indexer, optionally routed through a
/// second proxy hop. One instance is shared by every connection; reqwest
/// pools the underlying sockets.
#[derive(Debug, Clone)]
pub struct Forwarder {
    http: Client,
}

#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Forwarder {
    pub fn new(upstream_proxy: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(format!("rewritarr/{}", env!("CARGO_PKG_VERSION")));

        if let Some(upstream) = upstream_proxy {
            let proxy = Proxy::all(format!("http://{upstream}"))
                .with_context(|| format!("UPSTREAM_PROXY `{upstream}` is not a usable proxy address"))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            http: builder.build()?,
        })
    }

    /// Forwards one request to the indexer and buffers the full response.
    /// Failures are surfaced once; retrying is the caller's business
    /// (in practice, Prowlarr's).
    pub async fn fetch(
        &self,
        method: Method,
        target: &str,
        headers: &HeaderMap,
        body: Option<Bytes>,
    ) -> Result<ForwardedResponse, ForwardError> {
        let mut forwarded = HeaderMap::new();
        for (name, value) in headers {
            if HOP_BY_HOP_REQUEST_HEADERS.contains(&name.as_str()) {
                continue;
            }
            forwarded.append(name.clone(), value.clone());
        }

        let mut request = self.http.request(method, target).headers(forwarded);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?;

        debug!(status = %status, bytes = body.len(), "upstream response received");

        Ok(ForwardedResponse {
            status,
            headers,
            body,
        })
    }
}

// Dropping the URL keeps the apikey query value out of every log line the
// error ends up in; the handler logs the redacted URL separately.
fn classify(err: reqwest::Error) -> ForwardError {
    let err = err.without_url();
    if err.is_timeout() {
        ForwardError::Timeout(err)
    } else if err.is_connect() {
        ForwardError::Connect(err)
    } else {
        ForwardError::Upstream(err)
    }
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request timed out")]
    Timeout(#[source] reqwest::Error),
    #[error("failed to connect to upstream")]
    Connect(#[source] reqwest::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),
}
