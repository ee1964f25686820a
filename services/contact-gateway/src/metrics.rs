//! Prometheus metrics exposition
//!
//! Gateway-level metrics (the CRM-call metrics are emitted by the
//! `bitrix-rest` crate and share the same recorder):
//!
//! - `gateway_requests_total` (counter): labels `status`, `method`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `crm_requests_total` / `crm_request_duration_seconds` /
//!   `crm_token_refresh_total` (from bitrix-rest)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Both duration metrics get explicit buckets so they render as Prometheus
/// histograms (with `_bucket` lines for `histogram_quantile()` queries)
/// rather than the default summary. Boundaries cover 5ms to 60s, matching
/// the configurable upstream timeout range.
pub fn install_recorder() -> PrometheusHandle {
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "gateway_request_duration_seconds".to_string(),
            ),
            BUCKETS,
        )
        .expect("failed to set histogram buckets")
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("crm_request_duration_seconds".to_string()),
            BUCKETS,
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed inbound request with status code and method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}
