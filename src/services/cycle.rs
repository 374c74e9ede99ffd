//! Aggregation Cycle Service
//!
//! Periodically snapshots every bean registry into collectors and pushes them
//! to the sink as one batch:
//!
//! 1. Delay beans: expired beans lose their summary child and are removed;
//!    live beans hand their per-cycle max/min/avg/variance to fresh gauges.
//! 2. Count beans: expired beans are removed; live beans are read-and-cleared
//!    into one fresh gauge per index.
//! 3. Every `clear_every_cycles` pushes the job is deleted first, then the
//!    batch (gauges, the persistent summary, count gauges) is pushed.
//!
//! Sink failures are logged and counted. The cycle never retries and never
//! restores cleared accumulators; that cycle's values are lost.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::framework::{Service, ServiceError, ServiceStatus};
use crate::clock::SharedClock;
use crate::collector::{Collector, LabeledGauge, LabeledSummary};
use crate::metrics;
use crate::registry::{CountBeanRegistry, DelayBeanRegistry};
use crate::sink::PushSink;
use crate::types::MetricType;

/// Configuration for the aggregation cycle
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Time between cycles
    pub period: Duration,

    /// A series unused for longer than this is evicted, in milliseconds
    pub expiration_ms: u64,

    /// Delete the job before every N-th push
    pub clear_every_cycles: u64,

    /// Skip the max/min/avg/variance gauges
    pub summary_only: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(5_000),
            expiration_ms: 10_000,
            clear_every_cycles: 3_600,
            summary_only: false,
        }
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Another cycle was in progress; nothing was done
    pub skipped: bool,
    /// Delay series pushed
    pub delay_series: usize,
    /// Delay series evicted
    pub delay_evicted: usize,
    /// Count series pushed, across all indexes
    pub count_series: usize,
    /// Count series evicted, across all indexes
    pub count_evicted: usize,
    /// Collectors in the pushed batch
    pub collectors: usize,
    /// The job was deleted before the push
    pub job_deleted: bool,
    /// The sink accepted the batch
    pub pushed: bool,
}

impl CycleReport {
    /// Report for a cycle that did not run
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Periodic snapshot-and-push service
pub struct AggregationCycle {
    config: CycleConfig,
    job_id: String,
    counts: Arc<CountBeanRegistry>,
    delays: Arc<DelayBeanRegistry>,
    summary: Arc<LabeledSummary>,
    sink: Arc<dyn PushSink>,
    clock: SharedClock,
    push_count: AtomicU64,
    running: AtomicBool,
    status: RwLock<ServiceStatus>,
}

/// Clears the re-entrancy flag even if the cycle future is dropped midway
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AggregationCycle {
    /// Create a cycle over shared registries
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CycleConfig,
        job_id: impl Into<String>,
        counts: Arc<CountBeanRegistry>,
        delays: Arc<DelayBeanRegistry>,
        summary: Arc<LabeledSummary>,
        sink: Arc<dyn PushSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            job_id: job_id.into(),
            counts,
            delays,
            summary,
            sink,
            clock,
            push_count: AtomicU64::new(0),
            running: AtomicBool::new(false),
            status: RwLock::new(ServiceStatus::Stopped),
        }
    }

    /// Job identifier every batch is pushed under
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Cycles that reached the push step
    pub fn push_count(&self) -> u64 {
        self.push_count.load(Ordering::Acquire)
    }

    /// Run one cycle now
    ///
    /// Returns [`CycleReport::skipped`] when another cycle is in progress.
    pub async fn run_once(&self) -> CycleReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Aggregation cycle already running, skipping");
            return CycleReport::skipped();
        }
        let _guard = RunningGuard(&self.running);

        let started = Instant::now();
        let now = self.clock.now_millis();
        let mut report = CycleReport::default();
        let mut batch: Vec<Arc<dyn Collector>> = Vec::new();

        self.collect_delays(now, &mut report, &mut batch);
        self.collect_counts(now, &mut report, &mut batch);
        report.collectors = batch.len();

        let cycle = self.push_count.fetch_add(1, Ordering::AcqRel);
        if cycle % self.config.clear_every_cycles.max(1) == 0 {
            match self.sink.delete_job(&self.job_id).await {
                Ok(()) => report.job_deleted = true,
                Err(e) => {
                    tracing::error!(job = %self.job_id, error = %e, "Failed to delete job");
                    metrics::record_sink_failure("delete");
                },
            }
        }

        match self.sink.push_batch(&self.job_id, &batch).await {
            Ok(()) => report.pushed = true,
            Err(e) => {
                tracing::error!(
                    job = %self.job_id,
                    collectors = batch.len(),
                    error = %e,
                    "Failed to push batch"
                );
                metrics::record_sink_failure("push");
            },
        }

        metrics::record_cycle(started.elapsed().as_secs_f64(), report.pushed);
        tracing::debug!(
            cycle,
            delay_series = report.delay_series,
            count_series = report.count_series,
            evicted = report.delay_evicted + report.count_evicted,
            pushed = report.pushed,
            "Aggregation cycle complete"
        );
        report
    }

    fn collect_delays(
        &self,
        now: u64,
        report: &mut CycleReport,
        batch: &mut Vec<Arc<dyn Collector>>,
    ) {
        let sweep = self.delays.sweep(now, self.config.expiration_ms, &self.summary);

        report.delay_series = sweep.live.len();
        report.delay_evicted = sweep.evicted.len();
        metrics::record_evicted("delay", sweep.evicted.len());
        metrics::update_active_series("delay", sweep.live.len());

        if !self.config.summary_only {
            let [max, min, avg, variance] = [
                MetricType::Max,
                MetricType::Min,
                MetricType::Avg,
                MetricType::Variance,
            ]
            .map(|t| Arc::new(LabeledGauge::new(t.name(), t.description())));

            for bean in &sweep.live {
                let snapshot = bean.take_snapshot();
                let key = bean.key();
                if let Some(v) = snapshot.max {
                    max.child(key).set(v);
                }
                if let Some(v) = snapshot.min {
                    min.child(key).set(v);
                }
                if let Some(v) = snapshot.avg {
                    avg.child(key).set(v);
                }
                if let Some(v) = snapshot.variance {
                    variance.child(key).set(v);
                }
            }

            batch.push(max);
            batch.push(min);
            batch.push(avg);
            batch.push(variance);
        }

        batch.push(self.summary.clone());
    }

    fn collect_counts(
        &self,
        now: u64,
        report: &mut CycleReport,
        batch: &mut Vec<Arc<dyn Collector>>,
    ) {
        let mut sweeps = self.counts.sweep(now, self.config.expiration_ms);
        sweeps.sort_by(|a, b| a.index.cmp(&b.index));

        for sweep in sweeps {
            report.count_evicted += sweep.evicted;
            report.count_series += sweep.live.len();
            if sweep.live.is_empty() {
                continue;
            }

            let gauge = Arc::new(LabeledGauge::new(sweep.index.clone(), sweep.index));
            for bean in &sweep.live {
                gauge.child(bean.key()).set(bean.take());
            }
            batch.push(gauge);
        }

        metrics::record_evicted("count", report.count_evicted);
        metrics::update_active_series("count", report.count_series);
    }
}

#[async_trait::async_trait]
impl Service for AggregationCycle {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        tracing::debug!(
            job = %self.job_id,
            period_ms = self.config.period.as_millis() as u64,
            "Aggregation cycle started"
        );

        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Aggregation cycle received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Aggregation cycle receiver lagged");
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        tracing::debug!("Aggregation cycle stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "aggregation_cycle"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
