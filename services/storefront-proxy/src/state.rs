//! Shared application state and runtime counters

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use backend_auth::RefreshGate;
use forwarder::Forwarder;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;

use crate::cookies::CookieSettings;

/// How long in-flight requests get to finish after SIGTERM/SIGINT.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Forwarder,
    pub client: reqwest::Client,
    pub api_base: String,
    pub refresh_gate: Arc<RefreshGate>,
    pub cookies: CookieSettings,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
    pub cancel: CancelSignal,
}

impl AppState {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        cookies: CookieSettings,
        prometheus: PrometheusHandle,
    ) -> Self {
        let api_base = api_base.into();
        Self {
            forwarder: Forwarder::new(client.clone(), api_base.clone()),
            refresh_gate: Arc::new(RefreshGate::new(client.clone(), api_base.clone())),
            client,
            api_base,
            cookies,
            metrics: ServiceMetrics::new(),
            prometheus,
            cancel: CancelSignal::new(),
        }
    }
}

/// Runtime counters surfaced by `/health`
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being processed; reported when the drain deadline
    /// expires with work still outstanding.
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    /// Count a new request and hold it in flight until the guard drops.
    pub fn begin_request(&self) -> InFlightGuard {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop, including when the handler
/// future is dropped because the client went away.
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Process-wide cancellation for outbound calls, fired when the drain
/// deadline passes.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Completes once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for can only fail if it is dropped
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
