//! Prometheus metrics exposition
//!
//! The pool emits `token_refresh_total` and `token_expires_in_seconds`; the
//! service adds its own HTTP-side metrics:
//!
//! - `token_lookups_total` (counter): label `outcome`
//! - `http_request_duration_seconds` (histogram): labels `path`, `status`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("http_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record one token lookup. `outcome` is `hit`, `missing_app_id`,
/// `not_found`, `fetch_failed` or `internal`.
pub fn record_lookup(outcome: &'static str) {
    metrics::counter!("token_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_request(path: &str, status: u16, duration_secs: f64) {
    metrics::histogram!(
        "http_request_duration_seconds",
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder()
        .expect("failed to set histogram buckets")
        .build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}
