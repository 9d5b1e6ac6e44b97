//! Storefront session proxy
//!
//! Single-binary Rust service that:
//! 1. Relays browser calls to the backend API through `POST /api/proxy`,
//!    attaching the session's bearer token from httpOnly cookies
//! 2. Refreshes an expired session once and replays the call
//! 3. Owns the session cookies through the login, refresh and logout routes

mod config;
mod cookies;
mod error;
mod metrics;
mod proxy;
mod session;
mod state;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::cookies::CookieSettings;
use crate::state::{AppState, DRAIN_TIMEOUT};

/// Grace period for cancelled calls to answer after the drain deadline.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit caps simultaneous requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/proxy", post(proxy::proxy_handler))
        .route("/api/auth/login", post(session::login_handler))
        .route("/api/auth/refresh", post(session::refresh_handler))
        .route("/api/auth/logout", post(session::logout_handler))
        .layer(DefaultBodyLimit::max(proxy::MAX_BODY_BYTES))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filtered by LOG_LEVEL, then RUST_LOG, then "info"
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting storefront-proxy");

    // Install before anything records a metric
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        api_base = %config.backend.api_base,
        timeout_secs = config.backend.timeout_secs,
        secure_cookies = config.cookies.secure,
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.backend.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let app_state = AppState::new(
        client,
        config.backend.api_base.clone(),
        CookieSettings {
            secure: config.cookies.secure,
        },
        prometheus_handle,
    );
    let in_flight = app_state.metrics.in_flight.clone();
    let cancel = app_state.cancel.clone();

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain deadline starts when the signal arrives, not at startup:
    // tell the server to drain, then race the drain against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                remaining = in_flight.load(Ordering::Relaxed),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, cancelling outstanding backend calls"
            );
            // Outstanding proxy calls answer 503 instead of being cut off
            cancel.cancel();
            if tokio::time::timeout(CANCEL_GRACE, &mut server_handle)
                .await
                .is_err()
            {
                server_handle.abort();
            }
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness plus the counters operators look at first.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "api_base": state.api_base,
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
