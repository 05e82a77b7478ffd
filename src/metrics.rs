//! Prometheus metrics for admission decisions and dependency health.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_requests_total",
        "Total number of rate limit decisions",
        &["status", "mechanism"]
    )
    .expect("rate_limit_requests_total registers once");
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "rate_limit_latency_seconds",
        "Latency of rate limit checks"
    )
    .expect("rate_limit_latency_seconds registers once");
    pub static ref DEPENDENCY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dependency_failures_total",
        "Total number of failed dependency calls",
        &["reason"]
    )
    .expect("dependency_failures_total registers once");
    pub static ref DEPENDENCY_AVAILABLE: IntGauge = register_int_gauge!(
        "dependency_available",
        "Whether the last dependency call succeeded"
    )
    .expect("dependency_available registers once");
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        REQUESTS_TOTAL.with_label_values(&["allowed", "store"]).inc();
        DEPENDENCY_AVAILABLE.set(1);

        let text = render();
        assert!(text.contains("rate_limit_requests_total"));
        assert!(text.contains("dependency_available"));
    }
}
