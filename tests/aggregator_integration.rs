//! Integration tests for the aggregation pipeline
//!
//! These tests drive the public API end to end:
//! - Recorders enqueue, the worker applies, a cycle pushes to the sink
//! - Per-cycle read-and-clear versus cumulative summaries
//! - Inactivity eviction on a manual clock
//! - Queue overflow, sink failures and the job-delete cadence
//! - Start/stop lifecycle with the background services running

use std::sync::Arc;
use std::time::Duration;

use kuba_aggregator::{
    Aggregator, Config, DurationUnit, InMemorySink, LabelKey, ManualClock, MetricType,
};

// ============================================================================
// Helper Functions
// ============================================================================

const START_MILLIS: u64 = 1_700_000_000_000;

struct Harness {
    clock: Arc<ManualClock>,
    sink: Arc<InMemorySink>,
    aggregator: Aggregator,
}

fn harness(config: Config) -> Harness {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let sink = Arc::new(InMemorySink::new());
    let aggregator = Aggregator::with_clock(config, sink.clone(), clock.clone())
        .expect("Failed to create aggregator");
    Harness {
        clock,
        sink,
        aggregator,
    }
}

fn prod() -> LabelKey {
    LabelKey::from_pairs([("env", "prod")]).expect("Invalid labels")
}

// ============================================================================
// End-to-end aggregation
// ============================================================================

#[tokio::test]
async fn test_delay_statistics_end_to_end() {
    let h = harness(Config::default());
    let recorder = h
        .aggregator
        .delay_recorder()
        .label_names(["env"])
        .label_values(["prod"])
        .build()
        .expect("Failed to build recorder");

    for d in [10.0, 20.0, 30.0] {
        recorder.record(d);
    }
    h.aggregator.flush().await;

    let report = h.aggregator.run_cycle().await;
    assert!(report.pushed);
    assert_eq!(report.delay_series, 1);

    let batch = h.sink.last_batch().expect("No batch pushed");
    assert_eq!(batch.job, h.aggregator.job_id());
    assert_eq!(batch.value("delay_max", &[("env", "prod")]), Some(30.0));
    assert_eq!(batch.value("delay_min", &[("env", "prod")]), Some(10.0));
    assert_eq!(batch.value("delay_avg", &[("env", "prod")]), Some(20.0));

    let variance = batch.value("delay_variance", &[("env", "prod")]).unwrap();
    assert!((variance - 200.0 / 3.0).abs() < 1e-9);

    let child = h.aggregator.summary().child_for(&prod()).expect("No summary child");
    let value = child.value();
    assert_eq!(value.count, 3);
    assert_eq!(value.sum, 60.0);

    let median = batch
        .value("delay_summary", &[("env", "prod"), ("quantile", "0.5")])
        .expect("No median sample");
    assert!([10.0, 20.0, 30.0].contains(&median));
}

#[tokio::test]
async fn test_count_reports_delta_per_cycle() {
    let h = harness(Config::default());
    let recorder = h
        .aggregator
        .count_recorder()
        .index_name("requests")
        .label_names(["route"])
        .label_values(["/a"])
        .build()
        .expect("Failed to build recorder");

    recorder.increase(5.0);
    recorder.increase(3.0);
    h.aggregator.flush().await;

    h.aggregator.run_cycle().await;
    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("requests", &[("route", "/a")]), Some(8.0));

    h.aggregator.run_cycle().await;
    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("requests", &[("route", "/a")]), Some(0.0));
}

#[tokio::test]
async fn test_count_operations_apply_in_order() {
    let h = harness(Config::default());
    let recorder = h.aggregator.count_recorder().build().unwrap();

    recorder.increase(10.0);
    recorder.reduce(4.0);
    recorder.reset(2.0);
    recorder.increase(1.0);
    h.aggregator.flush().await;

    h.aggregator.run_cycle().await;
    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("count", &[]), Some(3.0));
}

#[tokio::test]
async fn test_summary_is_cumulative_across_cycles() {
    let h = harness(Config::default());
    let recorder = h
        .aggregator
        .delay_recorder()
        .label_names(["env"])
        .label_values(["prod"])
        .build()
        .unwrap();

    recorder.record(10.0);
    h.aggregator.flush().await;
    h.aggregator.run_cycle().await;

    recorder.record(20.0);
    h.aggregator.flush().await;
    h.aggregator.run_cycle().await;

    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("delay_max", &[("env", "prod")]), Some(20.0));

    let child = h.aggregator.summary().child_for(&prod()).unwrap();
    assert_eq!(child.count(), 2);
    assert_eq!(child.sum(), 30.0);
}

#[tokio::test]
async fn test_units_converted_to_milliseconds() {
    let h = harness(Config::default());
    let recorder = h
        .aggregator
        .delay_recorder()
        .label_names(["env"])
        .label_values(["prod"])
        .unit(DurationUnit::Nanos)
        .metric_types([MetricType::Max, MetricType::Summary])
        .build()
        .unwrap();

    recorder.record(4_000_000.0);
    recorder.record_elapsed(Duration::from_millis(6));
    h.aggregator.flush().await;
    h.aggregator.run_cycle().await;

    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("delay_max", &[("env", "prod")]), Some(6.0));
    // Untracked statistics have no child for the series
    assert_eq!(batch.value("delay_min", &[("env", "prod")]), None);
    assert_eq!(h.aggregator.summary().child_for(&prod()).unwrap().sum(), 10.0);
}

// ============================================================================
// Label keys
// ============================================================================

#[tokio::test]
async fn test_label_order_resolves_to_one_series() {
    let h = harness(Config::default());
    let a = h
        .aggregator
        .delay_recorder()
        .label_names(["a", "b"])
        .label_values(["1", "2"])
        .build()
        .unwrap();
    let b = h
        .aggregator
        .delay_recorder()
        .label_names(["b", "a"])
        .label_values(["2", "1"])
        .build()
        .unwrap();
    let extra = h
        .aggregator
        .delay_recorder()
        .label_names(["a", "b", "c"])
        .label_values(["1", "2", "3"])
        .build()
        .unwrap();

    a.record(1.0);
    b.record(2.0);
    extra.record(3.0);
    h.aggregator.flush().await;

    assert_eq!(h.aggregator.delay_registry().len(), 2);
    assert_eq!(h.aggregator.summary().len(), 2);
    assert_eq!(h.aggregator.summary().child_for(a.key()).unwrap().count(), 2);
}

// ============================================================================
// Expiration
// ============================================================================

#[tokio::test]
async fn test_inactive_series_evicted() {
    let h = harness(Config::default());
    let delay = h
        .aggregator
        .delay_recorder()
        .label_names(["env"])
        .label_values(["prod"])
        .build()
        .unwrap();
    let count = h.aggregator.count_recorder().index_name("requests").build().unwrap();

    delay.record(5.0);
    count.increase(1.0);
    h.aggregator.flush().await;

    // Exactly at the window the series survive
    h.clock.advance(Duration::from_millis(10_000));
    let report = h.aggregator.run_cycle().await;
    assert_eq!(report.delay_series, 1);
    assert_eq!(report.count_series, 1);

    h.clock.advance(Duration::from_millis(1));
    let report = h.aggregator.run_cycle().await;
    assert_eq!(report.delay_evicted, 1);
    assert_eq!(report.count_evicted, 1);

    let batch = h.sink.last_batch().unwrap();
    assert!(batch.value("delay_max", &[("env", "prod")]).is_none());
    assert!(batch.samples_named("requests").next().is_none());

    assert!(h.aggregator.delay_registry().is_empty());
    assert_eq!(h.aggregator.count_registry().series_count(), 0);
    assert!(h.aggregator.summary().child_for(&prod()).is_none());

    // A new record starts a fresh series with a fresh summary
    delay.record(7.0);
    h.aggregator.flush().await;
    assert_eq!(h.aggregator.summary().child_for(&prod()).unwrap().count(), 1);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_queue_overflow_drops_oldest() {
    let mut config = Config::default();
    config.ingestion.queue_capacity = 3;
    let h = harness(config);
    let recorder = h.aggregator.count_recorder().index_name("requests").build().unwrap();

    for v in 1..=5 {
        recorder.increase(v as f64);
    }
    assert_eq!(h.aggregator.dropped_records(), 2);

    h.aggregator.flush().await;
    h.aggregator.run_cycle().await;
    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("requests", &[]), Some(12.0));
}

#[tokio::test]
async fn test_series_capacity_drops_new_series_only() {
    let mut config = Config::default();
    config.registry.delay_series_capacity = 1;
    let h = harness(config);

    for env in ["prod", "staging"] {
        h.aggregator
            .delay_recorder()
            .label_names(["env"])
            .label_values([env])
            .build()
            .unwrap()
            .record(1.0);
    }
    h.aggregator.flush().await;

    assert_eq!(h.aggregator.delay_registry().len(), 1);
    assert!(h.aggregator.delay_registry().get(&prod()).is_some());
}

#[tokio::test]
async fn test_sink_failure_loses_cycle_but_clears() {
    let h = harness(Config::default());
    let recorder = h.aggregator.count_recorder().index_name("requests").build().unwrap();

    recorder.increase(4.0);
    h.aggregator.flush().await;

    h.sink.set_failing(true);
    let report = h.aggregator.run_cycle().await;
    assert!(!report.pushed);

    h.sink.set_failing(false);
    recorder.increase(1.0);
    h.aggregator.flush().await;
    let report = h.aggregator.run_cycle().await;
    assert!(report.pushed);

    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("requests", &[]), Some(1.0));
}

#[tokio::test]
async fn test_job_deleted_on_cadence() {
    let mut config = Config::default();
    config.push.clear_every_cycles = 2;
    let h = harness(config);

    for _ in 0..4 {
        h.aggregator.run_cycle().await;
    }

    let job = h.aggregator.job_id().to_string();
    assert_eq!(h.sink.deleted_jobs(), vec![job.clone(), job]);
    assert_eq!(h.sink.batches().len(), 4);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_running_services_apply_records() {
    let mut config = Config::default();
    config.push.period_ms = 60_000;
    let h = harness(config);

    h.aggregator.start().await.expect("Failed to start");
    // The first cycle runs as soon as the service starts
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.sink.batches().len(), 1);

    let recorder = h
        .aggregator
        .delay_recorder()
        .label_names(["env"])
        .label_values(["prod"])
        .build()
        .unwrap();
    for d in [10.0, 20.0, 30.0] {
        recorder.record(d);
    }
    h.aggregator.flush().await;

    h.aggregator.run_cycle().await;
    let batch = h.sink.last_batch().unwrap();
    assert_eq!(batch.value("delay_max", &[("env", "prod")]), Some(30.0));

    h.aggregator.stop().await.expect("Failed to stop");
    h.aggregator.stop().await.expect("Second stop failed");
    assert!(!h.aggregator.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_start_stop() {
    let h = Arc::new(harness(Config::default()));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                h.aggregator.start().await
            } else {
                h.aggregator.stop().await
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("Lifecycle call failed");
    }

    h.aggregator.stop().await.unwrap();
    assert!(!h.aggregator.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_applies_pending_records() {
    let h = harness(Config::default());
    h.aggregator.start().await.unwrap();

    let recorder = h.aggregator.count_recorder().index_name("requests").build().unwrap();
    for _ in 0..100 {
        recorder.increase(1.0);
    }
    h.aggregator.stop().await.unwrap();

    let bean = h
        .aggregator
        .count_registry()
        .get("requests", &LabelKey::empty())
        .expect("Records were not applied");
    // The first cycle may already have read part of the total
    assert!(bean.peek() <= 100.0);
    assert_eq!(h.aggregator.dropped_records(), 0);
}
