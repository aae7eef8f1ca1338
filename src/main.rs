mod category;
mod config;
mod forward;
mod http;
mod item;
mod newznab;
mod pipeline;
mod quality;
mod title;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tower::{Service, ServiceExt};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::forward::Forwarder;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub forwarder: Forwarder,
}

pub type SharedAppState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.log_level);

    tracing::info!("rewritarr v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        upstream_proxy = config.upstream_proxy.as_deref().unwrap_or("none (direct)"),
        rewrite_music = config.rewrite.music,
        rewrite_books = config.rewrite.books,
        rewrite_audiobooks = config.rewrite.audiobooks,
        best_effort = config.rewrite.best_effort,
        debug_attrs = config.rewrite.debug_attrs,
        "effective configuration"
    );

    let forwarder = Forwarder::new(config.upstream_proxy.as_deref(), config.upstream_timeout)
        .context("failed to construct upstream HTTP client")?;

    let listen_addr = config.listen_addr;
    let state = Arc::new(AppState { config, forwarder });
    let app = http::router(state);

    // CONNECT requests carry no path and never hit the router; everything
    // else does. The wrapper keeps both on the same listener.
    let tower_service = tower::service_fn(move |request: Request<Incoming>| {
        let app = app.clone();
        let request = request.map(Body::new);
        async move {
            if request.method() == Method::CONNECT {
                Ok::<_, Infallible>(http::connect(request).await)
            } else {
                app.oneshot(request).await
            }
        }
    });

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {listen_addr}"))?;

    tracing::info!(
        "proxying newznab requests on {}; add this address as an HTTP proxy in Prowlarr",
        listener.local_addr()?
    );

    loop {
        let (stream, _remote) = listener
            .accept()
            .await
            .context("failed to accept connection")?;
        let io = TokioIo::new(stream);
        let service = tower_service.clone();

        tokio::spawn(async move {
            let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
                service.clone().call(request)
            });

            if let Err(err) = http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(io, hyper_service)
                .with_upgrades()
                .await
            {
                tracing::debug!(error = %err, "connection terminated");
            }
        });
    }
}

fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_ascii_lowercase()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().without_time())
        .init();
}
