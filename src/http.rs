use std::borrow::Cow;

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use url::Url;

use crate::SharedAppState;
use crate::forward::ForwardError;
use crate::pipeline::{self, RewriteOutcome};

/// Hosts Prowlarr routinely tunnels to that never carry indexer feeds, so a
/// CONNECT to them is not worth a warning.
const SAFE_CONNECT_HOSTS: &[&str] = &["prowlarr.servarr.com"];

/// Newznab operations whose responses are item feeds worth rewriting.
/// `t=caps` is deliberately absent.
const NEWZNAB_SEARCH_OPS: &[&str] = &["search", "tvsearch", "music", "book", "movie"];

const SKIP_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "content-encoding",
    "content-length",
    "transfer-encoding",
];

pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(forward)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Forwards an absolute-URI proxy request to the indexer and, for 2xx
/// newznab search responses that look like XML, pipes the body through the
/// rewrite pipeline before relaying it. Everything else is relayed
/// untouched.
async fn forward(State(state): State<SharedAppState>, request: Request) -> Result<Response, HttpError> {
    let (parts, body) = request.into_parts();

    if parts.uri.scheme().is_none() {
        return Err(HttpError::NotProxyRequest);
    }
    let target = parts.uri.to_string();
    let display_url = redact_api_key(&target);
    debug!(method = %parts.method, url = %display_url, "proxying request");

    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|err| HttpError::RequestBody(err.to_string()))?;
    let body = (!body.is_empty()).then_some(body);

    let upstream = state
        .forwarder
        .fetch(parts.method, &target, &parts.headers, body)
        .await?;

    let mut response_body = upstream.body;
    if upstream.status.is_success()
        && is_newznab_api_request(&target)
        && looks_like_xml(content_type(&upstream.headers), &response_body)
    {
        debug!(
            url = %display_url,
            bytes = response_body.len(),
            "processing newznab XML response"
        );
        if let RewriteOutcome::Rewritten(document) =
            pipeline::rewrite_response(&response_body, &state.config.rewrite)
        {
            response_body = document.into();
        }
    }

    relay_response(&upstream.status, &upstream.headers, response_body)
}

fn relay_response(
    status: &StatusCode,
    headers: &HeaderMap,
    body: bytes::Bytes,
) -> Result<Response, HttpError> {
    let mut builder = Response::builder().status(*status);
    for (name, value) in headers {
        if SKIP_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(body))
        .map_err(|err| HttpError::Relay(err.to_string()))
}

/// Establishes an opaque CONNECT tunnel. HTTPS traffic cannot be rewritten,
/// so indexers meant for rewriting have to be configured with an http:// URL
/// in Prowlarr; the warning here is the operator's hint when they are not.
pub async fn connect(request: Request) -> Response {
    let Some(authority) = request.uri().authority().map(|auth| auth.to_string()) else {
        warn!(uri = %request.uri(), "CONNECT request without host:port target");
        return (StatusCode::BAD_REQUEST, "CONNECT target must be host:port").into_response();
    };

    let host = request.uri().host().unwrap_or_default();
    if !SAFE_CONNECT_HOSTS.contains(&host) {
        warn!(
            host,
            "HTTPS CONNECT tunnel requested; set the indexer URL to http:// in Prowlarr for title rewriting to work"
        );
    }

    tokio::spawn(async move {
        match hyper::upgrade::on(request).await {
            Ok(upgraded) => {
                if let Err(err) = tunnel(upgraded, &authority).await {
                    warn!(authority = %authority, error = %err, "CONNECT tunnel failed");
                }
            }
            Err(err) => warn!(authority = %authority, error = %err, "CONNECT upgrade failed"),
        }
    });

    Response::new(Body::empty())
}

async fn tunnel(upgraded: Upgraded, authority: &str) -> std::io::Result<()> {
    let mut server = TcpStream::connect(authority).await?;
    let mut client = TokioIo::new(upgraded);

    let (from_client, from_server) = tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    debug!(authority, from_client, from_server, "CONNECT tunnel closed");
    Ok(())
}

/// Whether the proxied URL is a newznab search API call whose response feed
/// is eligible for rewriting.
fn is_newznab_api_request(target: &str) -> bool {
    let Ok(url) = Url::parse(target) else {
        return false;
    };
    url.query_pairs()
        .any(|(name, value)| name == "t" && NEWZNAB_SEARCH_OPS.contains(&value.as_ref()))
}

/// Cheap body sniff: trust the content type when it says XML/RSS, otherwise
/// peek at the first bytes.
fn looks_like_xml(content_type: Option<&str>, body: &[u8]) -> bool {
    if let Some(content_type) = content_type {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("xml") || content_type.contains("rss") {
            return true;
        }
    }
    let head = body.get(..200).unwrap_or(body).trim_ascii_start();
    head.starts_with(b"<?xml") || head.starts_with(b"<rss")
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}

/// Replaces any `apikey` query value with `***` so request logs stay safe to
/// share.
fn redact_api_key(target: &str) -> String {
    let Ok(mut url) = Url::parse(target) else {
        return target.to_string();
    };

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if pairs.iter().any(|(name, _)| name.eq_ignore_ascii_case("apikey")) {
        let mut editor = url.query_pairs_mut();
        editor.clear();
        for (name, value) in &pairs {
            if name.eq_ignore_ascii_case("apikey") {
                editor.append_pair(name, "***");
            } else {
                editor.append_pair(name, value);
            }
        }
        drop(editor);
    }
    url.to_string()
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("not a proxy request (request target must be an absolute URL)")]
    NotProxyRequest,
    #[error("failed to read request body: {0}")]
    RequestBody(String),
    #[error("failed to relay upstream response: {0}")]
    Relay(String),
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message): (StatusCode, Cow<'static, str>) = match &self {
            HttpError::NotProxyRequest | HttpError::RequestBody(_) => {
                (StatusCode::BAD_REQUEST, Cow::from(self.to_string()))
            }
            HttpError::Relay(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Cow::from("Failed to relay upstream response"),
            ),
            HttpError::Forward(ForwardError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, Cow::from("Gateway Timeout"))
            }
            HttpError::Forward(_) => (StatusCode::BAD_GATEWAY, Cow::from("Bad Gateway")),
        };

        tracing::error!("proxy handler error: {self}");

        (status, message).into_response()
    }
}
