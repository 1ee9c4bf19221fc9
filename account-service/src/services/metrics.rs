//! Prometheus metrics for account-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Cache lookups by entity and outcome (hit, blank, miss).
pub static CACHE_LOOKUPS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "account_cache_lookups_total",
        "Total number of cache lookups by outcome",
        &["entity", "outcome"]
    )
    .expect("Failed to register cache_lookups_total")
});

/// Cache writes that failed after the store had already committed.
pub static CACHE_WRITE_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "account_cache_write_failures_total",
        "Total number of cache writes that failed after a committed store write",
        &["entity", "operation"]
    )
    .expect("Failed to register cache_write_failures_total")
});

/// Store query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "account_db_query_duration_seconds",
        "Database query duration in seconds",
        &["entity", "operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&CACHE_LOOKUPS);
    Lazy::force(&CACHE_WRITE_FAILURES);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
