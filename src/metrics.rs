//! Prometheus metrics for lifecycle operations
//!
//! Metrics are registered with the default Prometheus registry on first use;
//! [`gather_text`] renders everything in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::time::Duration;
use tracing::debug;

use crate::types::LifecycleAction;

lazy_static! {
    /// Completed lifecycle operations
    /// Labels: kind (process name), operation (deploy, start, stop, reconfig)
    pub static ref LIFECYCLE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("lifecycle_operations_total", "Completed lifecycle operations"),
        &["kind", "operation"]
    )
    .expect("Failed to create lifecycle_operations_total metric");

    /// Lifecycle operation duration in seconds
    /// Labels: kind, operation
    /// Buckets cover a fast local deploy up to a slow remote start
    pub static ref LIFECYCLE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "lifecycle_duration_seconds",
        "Time spent in lifecycle operations",
        &["kind", "operation"],
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("Failed to create lifecycle_duration_seconds metric");

    /// Liveness probes issued by start/stop polling
    /// Labels: kind, result (alive, dead)
    pub static ref LIVENESS_CHECKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("liveness_checks_total", "Liveness probes issued while polling"),
        &["kind", "result"]
    )
    .expect("Failed to create liveness_checks_total metric");

    /// Completed proxy reconfigurations
    /// Labels: cluster
    pub static ref PROXY_RECONFIG_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("proxy_reconfig_total", "Completed proxy reconfigurations"),
        &["cluster"]
    )
    .expect("Failed to create proxy_reconfig_total metric");
}

/// Record a completed lifecycle operation
pub fn record_lifecycle(kind: &str, action: LifecycleAction, elapsed: Duration) {
    LIFECYCLE_OPERATIONS_TOTAL
        .with_label_values(&[kind, action.as_str()])
        .inc();
    LIFECYCLE_DURATION_SECONDS
        .with_label_values(&[kind, action.as_str()])
        .observe(elapsed.as_secs_f64());
}

/// Record the result of a liveness probe
pub fn record_liveness_check(kind: &str, alive: bool) {
    let result = if alive { "alive" } else { "dead" };
    LIVENESS_CHECKS_TOTAL.with_label_values(&[kind, result]).inc();
}

/// Record a completed proxy reconfiguration
pub fn record_reconfig(cluster: &str, elapsed: Duration) {
    PROXY_RECONFIG_TOTAL.with_label_values(&[cluster]).inc();
    LIFECYCLE_DURATION_SECONDS
        .with_label_values(&["proxy", LifecycleAction::Reconfig.as_str()])
        .observe(elapsed.as_secs_f64());
    debug!(cluster = %cluster, "Recorded proxy reconfiguration");
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        debug!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
