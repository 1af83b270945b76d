//! Prometheus metrics exposition
//!
//! Installs the recorder that renders both the service metrics below and the
//! `jobpool_*` metrics recorded by the pool engine:
//!
//! - `proxy_requests_total` (counter): labels `status`, `method`, `route`
//! - `proxy_request_duration_seconds` (histogram): label `status`
//! - `proxy_upstream_errors_total` (counter): label `error_type`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("proxy_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `proxy_request_duration_seconds` gets explicit buckets so it renders as a
/// histogram (`_bucket` lines) rather than a summary. Priming can take tens
/// of seconds under upstream backoff, hence the 60s upper bucket.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request.
pub fn record_request(status: u16, method: &str, route: &'static str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "proxy_requests_total",
        "status" => status_str.clone(),
        "method" => method.to_string(),
        "route" => route
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a pass-through upstream failure with a classification label.
pub fn record_upstream_error(error_type: &'static str) {
    metrics::counter!("proxy_upstream_errors_total", "error_type" => error_type).increment(1);
}
