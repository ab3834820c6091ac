//! Prometheus metrics for the execution engine.
//!
//! Collectors are registered with the default registry on first access.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

// ===== Batch Metrics =====

/// Batches reaching a terminal state, by outcome
pub static BATCHES_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "akidb_client_batches_total",
        "Total number of batches reaching a terminal state",
        &["outcome"]
    )
    .expect("Failed to register batch counter")
});

/// Per-object outcomes, by status
pub static OBJECT_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "akidb_client_object_outcomes_total",
        "Total number of per-object outcomes",
        &["status"]
    )
    .expect("Failed to register object outcome counter")
});

/// Dispatch attempt round-trip latency
pub static DISPATCH_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "akidb_client_dispatch_latency_seconds",
        "Batch dispatch attempt latency in seconds",
        &["result"],
        // Buckets: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register dispatch latency histogram")
});

/// Scheduled retries, by error kind
pub static RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "akidb_client_retries_total",
        "Total number of scheduled batch retries",
        &["kind"]
    )
    .expect("Failed to register retry counter")
});

// ===== Concurrency Metrics =====

/// Current in-flight limit per endpoint
pub static MAX_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "akidb_client_max_in_flight",
        "Current maximum number of in-flight batches",
        &["endpoint"]
    )
    .expect("Failed to register max in-flight gauge")
});

/// Current target batch size per endpoint
pub static TARGET_BATCH_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "akidb_client_target_batch_size",
        "Current target batch size in objects",
        &["endpoint"]
    )
    .expect("Failed to register target batch size gauge")
});

// ===== Connection Metrics =====

/// RPC calls by method and result
pub static RPC_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "akidb_client_rpc_calls_total",
        "Total number of RPC calls",
        &["method", "result"]
    )
    .expect("Failed to register RPC call counter")
});

/// Channel health (0=reachable, 1=degraded, 2=unreachable)
pub static CONNECTION_HEALTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "akidb_client_connection_health",
        "Channel health (0=reachable, 1=degraded, 2=unreachable)",
        &["endpoint"]
    )
    .expect("Failed to register connection health gauge")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        BATCHES_DISPATCHED.with_label_values(&["completed"]).inc();
        OBJECT_OUTCOMES.with_label_values(&["succeeded"]).inc_by(3);
        MAX_IN_FLIGHT.with_label_values(&["test"]).set(4);
        assert!(OBJECT_OUTCOMES.with_label_values(&["succeeded"]).get() >= 3);
        assert_eq!(MAX_IN_FLIGHT.with_label_values(&["test"]).get(), 4);
    }
}
