//! Aggregator handle
//!
//! [`Aggregator`] wires the queue, registries, summary collector, ingestion
//! worker and aggregation cycle together. Producers obtain lightweight
//! recorders from it and record without blocking:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kuba_aggregator::{Aggregator, Config, LoggingSink};
//!
//! # async fn run() -> kuba_aggregator::Result<()> {
//! let aggregator = Aggregator::new(Config::default(), Arc::new(LoggingSink))?;
//! aggregator.start().await?;
//!
//! let latency = aggregator
//!     .delay_recorder()
//!     .label_names(["env"])
//!     .label_values(["prod"])
//!     .build()?;
//! latency.record(12.5);
//!
//! let requests = aggregator
//!     .count_recorder()
//!     .index_name("requests")
//!     .label_names(["route"])
//!     .label_values(["/a"])
//!     .build()?;
//! requests.increase(1.0);
//!
//! aggregator.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::clock::{SharedClock, SystemClock};
use crate::collector::LabeledSummary;
use crate::config::Config;
use crate::error::{LabelError, Result};
use crate::ingestion::{CountSeries, DelaySeries, IngestionWorker, RecordQueue, RecordRequest};
use crate::metrics;
use crate::registry::{CountBeanRegistry, DelayBeanRegistry};
use crate::services::{AggregationCycle, CycleConfig, CycleReport, ServiceConfig, ServiceManager};
use crate::sink::PushSink;
use crate::types::{
    sanitize_index_name, CountOp, DurationUnit, LabelKey, MetricType, DEFAULT_COUNT_INDEX,
    QUANTILE_LABEL,
};

/// Handle owning every piece of the aggregation pipeline
pub struct Aggregator {
    config: Config,
    job_id: String,
    queue: Arc<RecordQueue>,
    counts: Arc<CountBeanRegistry>,
    delays: Arc<DelayBeanRegistry>,
    summary: Arc<LabeledSummary>,
    worker: Arc<IngestionWorker>,
    cycle: Arc<AggregationCycle>,
    services: ServiceManager,
    /// Serializes start, stop and flush
    lifecycle: Mutex<()>,
}

impl Aggregator {
    /// Create an aggregator reading the system clock
    pub fn new(config: Config, sink: Arc<dyn PushSink>) -> Result<Self> {
        Self::with_clock(config, sink, SystemClock::shared())
    }

    /// Create an aggregator on an explicit clock
    ///
    /// Fails when `config` does not validate. Nothing runs until
    /// [`start`](Aggregator::start).
    pub fn with_clock(
        config: Config,
        sink: Arc<dyn PushSink>,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;
        metrics::init();

        let targets = config.summary.targets()?;
        let summary_name = if config.push.summary_only {
            format!("{}_{}", config.push.instance, MetricType::Summary.name())
        } else {
            MetricType::Summary.name().to_string()
        };
        let summary = Arc::new(LabeledSummary::new(
            summary_name,
            MetricType::Summary.description(),
            targets,
            config.summary.window(),
            config.summary.buckets,
            clock.clone(),
        )?);

        let queue = Arc::new(RecordQueue::new(config.ingestion.queue_capacity));
        let counts = Arc::new(CountBeanRegistry::new(
            config.registry.count_index_capacity,
            config.registry.count_series_capacity,
        ));
        let delays = Arc::new(DelayBeanRegistry::new(config.registry.delay_series_capacity));

        let job_id = format!("{}/{}", config.push.instance, clock.now_millis());

        let worker = Arc::new(IngestionWorker::new(
            queue.clone(),
            counts.clone(),
            delays.clone(),
            summary.clone(),
            clock.clone(),
        ));
        let cycle = Arc::new(AggregationCycle::new(
            CycleConfig {
                period: config.push.period(),
                expiration_ms: config.registry.expiration_ms,
                clear_every_cycles: config.push.clear_every_cycles,
                summary_only: config.push.summary_only,
            },
            job_id.clone(),
            counts.clone(),
            delays.clone(),
            summary.clone(),
            sink,
            clock,
        ));

        let services = ServiceManager::new(ServiceConfig::default());
        services.register(worker.clone())?;
        services.register(cycle.clone())?;

        tracing::debug!(job = %job_id, "Aggregator created");

        Ok(Self {
            config,
            job_id,
            queue,
            counts,
            delays,
            summary,
            worker,
            cycle,
            services,
            lifecycle: Mutex::new(()),
        })
    }

    /// Start the ingestion worker and the periodic cycle
    ///
    /// Starting a running aggregator is a no-op.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.services.is_running() {
            return Ok(());
        }

        self.services.start_all().await?;
        tracing::info!(job = %self.job_id, "Aggregator started");
        Ok(())
    }

    /// Apply every pending record, then stop both services
    ///
    /// Stopping a stopped aggregator is a no-op. A stopped aggregator can be
    /// started again.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.services.is_running() {
            return Ok(());
        }

        self.flush_locked().await;
        self.services.shutdown().await;
        tracing::info!(job = %self.job_id, "Aggregator stopped");
        Ok(())
    }

    /// Whether the background services are running
    pub fn is_running(&self) -> bool {
        self.services.is_running()
    }

    /// Wait until every record enqueued before this call has been applied
    ///
    /// When the services are stopped the queue is drained on the caller's task.
    pub async fn flush(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.flush_locked().await;
    }

    async fn flush_locked(&self) {
        if !self.services.is_running() {
            self.worker.drain();
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.queue.push(RecordRequest::Barrier(tx));
        // An overflowing queue may evict the barrier, which drops the sender
        if rx.await.is_err() {
            tracing::debug!("Flush barrier evicted from the record queue");
        }
    }

    /// Run one aggregation cycle now
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle.run_once().await
    }

    /// Start building a delay recorder
    pub fn delay_recorder(&self) -> DelayRecorderBuilder<'_> {
        DelayRecorderBuilder::new(self)
    }

    /// Start building a count recorder
    pub fn count_recorder(&self) -> CountRecorderBuilder<'_> {
        CountRecorderBuilder::new(self)
    }

    /// Job identifier batches are pushed under
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Configuration this aggregator was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The persistent summary collector
    pub fn summary(&self) -> &Arc<LabeledSummary> {
        &self.summary
    }

    /// The count registry
    pub fn count_registry(&self) -> &Arc<CountBeanRegistry> {
        &self.counts
    }

    /// The delay registry
    pub fn delay_registry(&self) -> &Arc<DelayBeanRegistry> {
        &self.delays
    }

    /// Records evicted from the queue by overflow
    pub fn dropped_records(&self) -> u64 {
        self.queue.dropped()
    }
}

// ============================================================================
// Delay recorder
// ============================================================================

/// Builder for a [`DelayRecorder`]
pub struct DelayRecorderBuilder<'a> {
    aggregator: &'a Aggregator,
    names: Option<Vec<String>>,
    values: Option<Vec<String>>,
    unit: DurationUnit,
    ring_size: Option<usize>,
    types: Option<Vec<MetricType>>,
}

impl<'a> DelayRecorderBuilder<'a> {
    fn new(aggregator: &'a Aggregator) -> Self {
        Self {
            aggregator,
            names: None,
            values: None,
            unit: DurationUnit::default(),
            ring_size: None,
            types: None,
        }
    }

    /// Set the label names
    pub fn label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the label values, parallel to the names
    pub fn label_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Unit of the durations passed to [`DelayRecorder::record`]
    pub fn unit(mut self, unit: DurationUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Capacity of the average and variance rings
    pub fn ring_size(mut self, ring_size: usize) -> Self {
        self.ring_size = Some(ring_size);
        self
    }

    /// Statistics to track; ignored in summary-only mode
    ///
    /// An empty selection tracks every statistic.
    pub fn metric_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = MetricType>,
    {
        self.types = Some(types.into_iter().collect());
        self
    }

    /// Validate the labels and produce the recorder
    pub fn build(self) -> std::result::Result<DelayRecorder, LabelError> {
        let config = &self.aggregator.config;
        let key = LabelKey::resolve(self.names, self.values)?;

        let types: Vec<MetricType> = if config.push.summary_only {
            vec![MetricType::Summary]
        } else {
            match self.types {
                Some(types) if !types.is_empty() => types,
                _ => MetricType::ALL.to_vec(),
            }
        };

        if types.contains(&MetricType::Summary) && key.get(QUANTILE_LABEL).is_some() {
            return Err(LabelError::ReservedName(QUANTILE_LABEL.to_string()));
        }

        Ok(DelayRecorder {
            queue: self.aggregator.queue.clone(),
            series: Arc::new(DelaySeries {
                key,
                types: types.into(),
                unit: self.unit,
                ring_size: self.ring_size.unwrap_or(config.summary.ring_size),
            }),
        })
    }
}

/// Records durations for one delay series
///
/// Cheap to clone; every clone feeds the same series.
#[derive(Clone)]
pub struct DelayRecorder {
    queue: Arc<RecordQueue>,
    series: Arc<DelaySeries>,
}

impl fmt::Debug for DelayRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayRecorder")
            .field("series", &self.series)
            .finish_non_exhaustive()
    }
}

impl DelayRecorder {
    /// Enqueue one duration, in the recorder's unit
    pub fn record(&self, duration: f64) {
        self.queue.push(RecordRequest::Delay {
            series: self.series.clone(),
            duration,
        });
    }

    /// Enqueue an elapsed [`Duration`]
    pub fn record_elapsed(&self, elapsed: Duration) {
        let duration = match self.series.unit {
            DurationUnit::Nanos => elapsed.as_nanos() as f64,
            DurationUnit::Micros => elapsed.as_secs_f64() * 1_000_000.0,
            DurationUnit::Millis => elapsed.as_secs_f64() * 1_000.0,
            DurationUnit::Seconds => elapsed.as_secs_f64(),
        };
        self.record(duration);
    }

    /// Label set of the series
    pub fn key(&self) -> &LabelKey {
        &self.series.key
    }

    /// Statistics tracked for the series
    pub fn metric_types(&self) -> &[MetricType] {
        &self.series.types
    }
}

// ============================================================================
// Count recorder
// ============================================================================

/// Builder for a [`CountRecorder`]
pub struct CountRecorderBuilder<'a> {
    aggregator: &'a Aggregator,
    index: Option<String>,
    names: Option<Vec<String>>,
    values: Option<Vec<String>>,
}

impl<'a> CountRecorderBuilder<'a> {
    fn new(aggregator: &'a Aggregator) -> Self {
        Self {
            aggregator,
            index: None,
            names: None,
            values: None,
        }
    }

    /// Index (pushed metric name); anything outside `[A-Za-z0-9_]` is stripped
    pub fn index_name(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Set the label names
    pub fn label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the label values, parallel to the names
    pub fn label_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Validate the index name and labels and produce the recorder
    pub fn build(self) -> std::result::Result<CountRecorder, LabelError> {
        let index = match self.index {
            Some(raw) => {
                let index = sanitize_index_name(&raw);
                if index.is_empty() {
                    return Err(LabelError::EmptyIndexName(raw));
                }
                index
            },
            None => DEFAULT_COUNT_INDEX.to_string(),
        };
        let key = LabelKey::resolve(self.names, self.values)?;

        Ok(CountRecorder {
            queue: self.aggregator.queue.clone(),
            series: Arc::new(CountSeries { index, key }),
        })
    }
}

/// Mutates one count series
///
/// Cheap to clone; every clone feeds the same series.
#[derive(Clone)]
pub struct CountRecorder {
    queue: Arc<RecordQueue>,
    series: Arc<CountSeries>,
}

impl fmt::Debug for CountRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountRecorder")
            .field("series", &self.series)
            .finish_non_exhaustive()
    }
}

impl CountRecorder {
    /// Add `v` to the accumulator
    pub fn increase(&self, v: f64) {
        self.push(CountOp::Increase(v));
    }

    /// Subtract `v` from the accumulator
    pub fn reduce(&self, v: f64) {
        self.push(CountOp::Reduce(v));
    }

    /// Overwrite the accumulator with `v`
    pub fn reset(&self, v: f64) {
        self.push(CountOp::Reset(v));
    }

    /// Sanitized index name
    pub fn index(&self) -> &str {
        &self.series.index
    }

    /// Label set of the series
    pub fn key(&self) -> &LabelKey {
        &self.series.key
    }

    fn push(&self, op: CountOp) {
        self.queue.push(RecordRequest::Count {
            series: self.series.clone(),
            op,
        });
    }
}
