//! Prometheus metrics exposition.
//!
//! - `gateway_requests_total` (counter): labels `status`, `method`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_upstream_errors_total` (counter): label `error_type`
//! - `gateway_failover_attempts_total` (counter): candidates tried
//!   beyond the first per request
//! - `gateway_queue_depth` (gauge): pending async-writer items
//! - `gateway_queue_oldest_item_age_seconds` (gauge): age of the oldest
//!   pending item
//! - `gateway_account_rate_limited` (gauge): 1/0 per account name

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `gateway_request_duration_seconds` with histogram buckets so it
/// renders as a Prometheus histogram (with `_bucket` lines for `histogram_quantile()`
/// queries) rather than the default summary. Bucket boundaries cover the range
/// from 5ms to 60s, matching the gateway's configurable timeout range.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("gateway_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed gateway request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str).record(duration_secs);
}

/// Record an upstream error with a classification label.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!("gateway_upstream_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Record one failover attempt (a candidate beyond the first tried for
/// a single request).
pub fn record_failover_attempt() {
    metrics::counter!("gateway_failover_attempts_total").increment(1);
}

/// Reflects the async writer's queue depth and oldest-item age gauges.
pub fn record_queue_metrics(depth: u64, oldest_item_age_ms: i64) {
    metrics::gauge!("gateway_queue_depth").set(depth as f64);
    metrics::gauge!("gateway_queue_oldest_item_age_seconds").set(oldest_item_age_ms as f64 / 1000.0);
}

/// Reflects whether an account is currently rate-limited.
pub fn record_account_rate_limited(account_name: &str, rate_limited: bool) {
    metrics::gauge!("gateway_account_rate_limited", "account" => account_name.to_string())
        .set(if rate_limited { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // When no recorder is installed, metrics calls are no-ops.
        // This verifies the functions don't panic in test environments.
        record_request(200, "GET", 0.05);
        record_upstream_error("timeout");
        record_failover_attempt();
        record_queue_metrics(0, 0);
        record_account_rate_limited("acct", false);
    }

    /// Create an isolated recorder/handle pair for unit tests.
    /// Uses build_recorder() instead of install_recorder() to avoid the
    /// global recorder singleton constraint — only one global recorder can
    /// exist per process, and install_recorder() panics on a second call.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full("gateway_request_duration_seconds".to_string()),
                DURATION_BUCKETS,
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "GET", 0.042);
        record_request(500, "POST", 1.5);

        let output = handle.render();
        assert!(output.contains("gateway_requests_total"));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("method=\"GET\""));
        assert!(output.contains("status=\"500\""));
        assert!(output.contains("method=\"POST\""));
        assert!(output.contains("gateway_request_duration_seconds_bucket"));
    }

    #[test]
    fn record_upstream_error_increments_counter_with_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_upstream_error("timeout");
        record_upstream_error("connection");

        let output = handle.render();
        assert!(output.contains("gateway_upstream_errors_total"));
        assert!(output.contains("error_type=\"timeout\""));
        assert!(output.contains("error_type=\"connection\""));
    }

    #[test]
    fn histogram_buckets_cover_spec_range() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "GET", 0.003); // 3ms, below lowest bucket

        let output = handle.render();
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"0.01\""));
        assert!(output.contains("le=\"60\""));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn queue_and_rate_limit_gauges_render() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_queue_metrics(4, 2_500);
        record_account_rate_limited("acct-1", true);

        let output = handle.render();
        assert!(output.contains("gateway_queue_depth"));
        assert!(output.contains("gateway_queue_oldest_item_age_seconds"));
        assert!(output.contains("gateway_account_rate_limited"));
        assert!(output.contains("account=\"acct-1\""));
    }

    #[test]
    fn failover_counter_renders() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_failover_attempt();
        record_failover_attempt();

        let output = handle.render();
        assert!(output.contains("gateway_failover_attempts_total"));
    }
}
