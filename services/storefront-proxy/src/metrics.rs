//! Prometheus metrics exposition
//!
//! - `storefront_proxy_requests_total` (counter): labels `status`, `method`
//! - `storefront_proxy_request_duration_seconds` (histogram): label `status`
//! - `storefront_proxy_upstream_errors_total` (counter): label `error_type`
//!
//! The forwarder crate adds `forwarder_refresh_attempts_total{outcome}` to the
//! same recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "storefront_proxy_request_duration_seconds";

/// 5ms to 60s, covering the configurable backend timeout range.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Explicit buckets make the duration metric render as a histogram with
/// `_bucket` lines rather than the exporter's default summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "storefront_proxy_requests_total",
        "status" => status_str.clone(),
        "method" => method.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "status" => status_str).record(duration_secs);
}

/// Record an upstream failure with a classification label.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!(
        "storefront_proxy_upstream_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}
