//! Self-telemetry for the aggregator
//!
//! Process-global Prometheus instruments describing the aggregator itself:
//! dropped records, cycle outcomes, sink failures and series churn. These are
//! separate from the aggregated series the cycle pushes to its sink.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram, CounterVec,
    Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};

lazy_static! {
    // === Ingestion ===

    /// Records discarded before reaching a bean
    pub static ref RECORDS_DROPPED: CounterVec = register_counter_vec!(
        "aggregator_records_dropped_total",
        "Records discarded before being applied, by reason",
        &["reason"]
    ).unwrap();

    /// Records applied to a bean
    pub static ref RECORDS_APPLIED: CounterVec = register_counter_vec!(
        "aggregator_records_applied_total",
        "Records applied to a bean, by series kind",
        &["kind"]
    ).unwrap();

    /// Pending records in the ingestion queue
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "aggregator_queue_depth",
        "Records waiting for the ingestion worker"
    ).unwrap();

    // === Cycle ===

    /// Completed cycles
    pub static ref CYCLES_TOTAL: CounterVec = register_counter_vec!(
        "aggregator_cycles_total",
        "Aggregation cycles run, by outcome",
        &["status"]
    ).unwrap();

    /// Cycle duration
    pub static ref CYCLE_DURATION: Histogram = register_histogram!(
        "aggregator_cycle_duration_seconds",
        "Aggregation cycle latency in seconds",
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Sink call failures
    pub static ref SINK_FAILURES: CounterVec = register_counter_vec!(
        "aggregator_sink_failures_total",
        "Failed push sink calls, by operation",
        &["operation"]
    ).unwrap();

    // === Series ===

    /// Series removed for inactivity
    pub static ref SERIES_EVICTED: CounterVec = register_counter_vec!(
        "aggregator_series_evicted_total",
        "Series evicted after the expiration window, by kind",
        &["kind"]
    ).unwrap();

    /// Live series after the last cycle
    pub static ref ACTIVE_SERIES: GaugeVec = register_gauge_vec!(
        "aggregator_active_series",
        "Series tracked after the last cycle, by kind",
        &["kind"]
    ).unwrap();
}

/// Touch every instrument so it appears in the first scrape
pub fn init() {
    lazy_static::initialize(&RECORDS_DROPPED);
    lazy_static::initialize(&RECORDS_APPLIED);
    lazy_static::initialize(&QUEUE_DEPTH);
    lazy_static::initialize(&CYCLES_TOTAL);
    lazy_static::initialize(&CYCLE_DURATION);
    lazy_static::initialize(&SINK_FAILURES);
    lazy_static::initialize(&SERIES_EVICTED);
    lazy_static::initialize(&ACTIVE_SERIES);

    tracing::debug!("Aggregator metrics initialized");
}

/// Get metrics in Prometheus text format
///
/// # Returns
///
/// Result containing the formatted metrics string, or an error if encoding fails
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a dropped record
#[inline]
pub fn record_dropped(reason: &str) {
    RECORDS_DROPPED.with_label_values(&[reason]).inc();
}

/// Record an applied record
#[inline]
pub fn record_applied(kind: &str) {
    RECORDS_APPLIED.with_label_values(&[kind]).inc();
}

/// Update the ingestion queue depth
#[inline]
pub fn update_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as f64);
}

/// Record a finished cycle
#[inline]
pub fn record_cycle(duration_secs: f64, pushed: bool) {
    let status = if pushed { "ok" } else { "push_failed" };
    CYCLES_TOTAL.with_label_values(&[status]).inc();
    CYCLE_DURATION.observe(duration_secs);
}

/// Record a failed sink call
#[inline]
pub fn record_sink_failure(operation: &str) {
    SINK_FAILURES.with_label_values(&[operation]).inc();
}

/// Record evicted series
#[inline]
pub fn record_evicted(kind: &str, count: usize) {
    if count > 0 {
        SERIES_EVICTED.with_label_values(&[kind]).inc_by(count as f64);
    }
}

/// Update the live series count
#[inline]
pub fn update_active_series(kind: &str, count: usize) {
    ACTIVE_SERIES.with_label_values(&[kind]).set(count as f64);
}
