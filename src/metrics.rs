/// Metrics and telemetry for the Aurora Gambit AppView
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Feed events received and applied
/// - Records indexed per collection
/// - Cursor checkpoint writes
/// - Move submissions
/// - Identity resolution

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

lazy_static! {
    // ========== Feed Metrics ==========

    /// Events received from the feed subscriptions, by source and kind
    pub static ref FEED_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feed_events_total",
        "Total number of events received from feed subscriptions",
        &["source", "kind"]
    )
    .unwrap();

    /// Records indexed into the cache, by collection and operation
    pub static ref RECORDS_INDEXED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "records_indexed_total",
        "Total number of records applied to the materialized cache",
        &["collection", "operation"]
    )
    .unwrap();

    /// Events dropped without a cache write, by reason
    pub static ref EVENTS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "events_dropped_total",
        "Total number of events dropped without applying",
        &["source", "reason"]
    )
    .unwrap();

    /// Apply failures that interrupted a feed, by source
    pub static ref APPLY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "apply_failures_total",
        "Total number of state application failures",
        &["source"]
    )
    .unwrap();

    /// Durable cursor checkpoint writes, by source
    pub static ref CURSOR_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cursor_writes_total",
        "Total number of durable cursor checkpoint writes",
        &["source"]
    )
    .unwrap();

    /// Last durable cursor value, by source
    pub static ref CURSOR_POSITION: IntGaugeVec = register_int_gauge_vec!(
        "cursor_position",
        "Last durable cursor value per feed source",
        &["source"]
    )
    .unwrap();

    /// Feed reconnect attempts, by source
    pub static ref FEED_RECONNECTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feed_reconnects_total",
        "Total number of feed reconnect attempts",
        &["source"]
    )
    .unwrap();

    // ========== Submission Metrics ==========

    /// Move and game submissions, by collection and outcome
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "submissions_total",
        "Total number of record submissions",
        &["collection", "outcome"]
    )
    .unwrap();

    // ========== Identity Resolution Metrics ==========

    /// Handle resolutions, by status
    pub static ref HANDLE_RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "handle_resolutions_total",
        "Total number of handle resolutions",
        &["status"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record an event received from a feed
pub fn record_feed_event(source: &str, kind: &str) {
    FEED_EVENTS_TOTAL.with_label_values(&[source, kind]).inc();
}

/// Record a successful cache application
pub fn record_indexed(collection: &str, operation: &str) {
    RECORDS_INDEXED_TOTAL
        .with_label_values(&[collection, operation])
        .inc();
}

/// Record an event dropped without a cache write
pub fn record_dropped(source: &str, reason: &str) {
    EVENTS_DROPPED_TOTAL
        .with_label_values(&[source, reason])
        .inc();
}

/// Record a state application failure
pub fn record_apply_failure(source: &str) {
    APPLY_FAILURES_TOTAL.with_label_values(&[source]).inc();
}

/// Record a durable cursor write
pub fn record_cursor_write(source: &str, seq: i64) {
    CURSOR_WRITES_TOTAL.with_label_values(&[source]).inc();
    CURSOR_POSITION.with_label_values(&[source]).set(seq);
}

/// Record a feed reconnect attempt
pub fn record_reconnect(source: &str) {
    FEED_RECONNECTS_TOTAL.with_label_values(&[source]).inc();
}

/// Record a submission outcome
pub fn record_submission(collection: &str, outcome: &str) {
    SUBMISSIONS_TOTAL
        .with_label_values(&[collection, outcome])
        .inc();
}

/// Record a handle resolution ("cache_hit", "resolved", "failed")
pub fn record_handle_resolution(status: &str) {
    HANDLE_RESOLUTIONS_TOTAL.with_label_values(&[status]).inc();
}
