//! Prometheus metrics exposition
//!
//! The library crates emit `central_*` metrics through the `metrics` facade;
//! this module installs the recorder that renders them and adds the
//! gateway's own HTTP metrics:
//!
//! - `gateway_http_requests_total` (counter): labels `status`, `method`
//! - `gateway_http_request_duration_seconds` (histogram): label `status`
//! - `central_pool_available` / `central_pool_total` (gauges), refreshed on
//!   every health check

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Latency buckets from 5ms to the default 120s attempt timeout.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Histograms rendered with `_bucket` lines instead of summaries.
const HISTOGRAMS: &[&str] = &[
    "central_request_duration_seconds",
    "central_pool_wait_seconds",
    "gateway_http_request_duration_seconds",
];

fn builder() -> PrometheusBuilder {
    HISTOGRAMS.iter().fold(PrometheusBuilder::new(), |builder, name| {
        builder
            .set_buckets_for_metric(Matcher::Full((*name).to_string()), LATENCY_BUCKETS)
            .expect("failed to set histogram buckets")
    })
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed inbound request.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_http_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_http_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Publish the credential pool occupancy.
pub fn set_pool_occupancy(available: usize, total: usize) {
    metrics::gauge!("central_pool_available").set(available as f64);
    metrics::gauge!("central_pool_total").set(total as f64);
}
