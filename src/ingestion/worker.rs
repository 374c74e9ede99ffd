//! Single-consumer ingestion worker
//!
//! Applies every queued record to the registries in arrival order. Being the
//! only writer, it never races another writer for the same bean; it only
//! shares beans with the aggregation cycle's reads.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::queue::RecordQueue;
use super::request::{CountSeries, DelaySeries, RecordRequest};
use crate::bean::DelayBean;
use crate::clock::SharedClock;
use crate::collector::{ChildFactory, LabeledSummary};
use crate::metrics;
use crate::registry::{CountBeanRegistry, DelayBeanRegistry};
use crate::services::{Service, ServiceError, ServiceStatus};
use crate::types::{CountOp, MetricType};

/// Drains the record queue into the bean registries
pub struct IngestionWorker {
    queue: Arc<RecordQueue>,
    counts: Arc<CountBeanRegistry>,
    delays: Arc<DelayBeanRegistry>,
    summary: Arc<LabeledSummary>,
    clock: SharedClock,
    status: RwLock<ServiceStatus>,
}

impl IngestionWorker {
    /// Create a worker over shared registries
    pub fn new(
        queue: Arc<RecordQueue>,
        counts: Arc<CountBeanRegistry>,
        delays: Arc<DelayBeanRegistry>,
        summary: Arc<LabeledSummary>,
        clock: SharedClock,
    ) -> Self {
        Self {
            queue,
            counts,
            delays,
            summary,
            clock,
            status: RwLock::new(ServiceStatus::Stopped),
        }
    }

    /// Apply every pending request; returns how many were processed
    pub fn drain(&self) -> usize {
        let mut processed = 0;
        while let Some(request) = self.queue.pop() {
            self.apply(request);
            processed += 1;
        }
        processed
    }

    /// Apply one request
    ///
    /// Capacity rejections are logged and counted; they never stop the worker.
    pub fn apply(&self, request: RecordRequest) {
        match request {
            RecordRequest::Count { series, op } => self.apply_count(&series, op),
            RecordRequest::Delay { series, duration } => self.apply_delay(&series, duration),
            RecordRequest::Barrier(done) => {
                // The waiter may have given up
                let _ = done.send(());
            },
        }
    }

    fn apply_count(&self, series: &CountSeries, op: CountOp) {
        let now = self.clock.now_millis();
        match self.counts.record(&series.index, &series.key, op, now) {
            Ok(()) => metrics::record_applied("count"),
            Err(e) => {
                warn!(
                    index = %series.index,
                    labels = %series.key,
                    error = %e,
                    "Dropping count record"
                );
                metrics::record_dropped(e.reason());
            },
        }
    }

    fn apply_delay(&self, series: &DelaySeries, duration: f64) {
        let now = self.clock.now_millis();
        let result = self.delays.record(&series.key, duration, now, || {
            let summary = if series.types.contains(&MetricType::Summary) {
                match self.summary.get_or_create(series.key.clone()) {
                    Ok(child) => Some(child),
                    Err(e) => {
                        warn!(labels = %series.key, error = %e, "Summary child rejected");
                        None
                    },
                }
            } else {
                None
            };
            DelayBean::new(
                series.key.clone(),
                &series.types,
                series.unit,
                series.ring_size,
                summary,
                now,
            )
        });

        match result {
            Ok(()) => metrics::record_applied("delay"),
            Err(e) => {
                warn!(labels = %series.key, error = %e, "Dropping delay record");
                metrics::record_dropped(e.reason());
            },
        }
    }
}

#[async_trait::async_trait]
impl Service for IngestionWorker {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        debug!(capacity = self.queue.capacity(), "Ingestion worker started");

        loop {
            self.drain();

            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            debug!("Ingestion worker received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "Ingestion worker broadcast receiver lagged");
                        }
                    }
                }

                _ = self.queue.notified() => {}
            }
        }

        // Apply whatever was accepted before the signal
        let remaining = self.drain();

        *self.status.write() = ServiceStatus::Stopped;
        debug!(remaining, "Ingestion worker stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ingestion"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::quantile::QuantileTarget;
    use crate::types::{DurationUnit, LabelKey};
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct Fixture {
        queue: Arc<RecordQueue>,
        counts: Arc<CountBeanRegistry>,
        delays: Arc<DelayBeanRegistry>,
        summary: Arc<LabeledSummary>,
        worker: Arc<IngestionWorker>,
    }

    fn fixture(delay_capacity: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = Arc::new(RecordQueue::new(64));
        let counts = Arc::new(CountBeanRegistry::new(4, 4));
        let delays = Arc::new(DelayBeanRegistry::new(delay_capacity));
        let targets: Arc<[QuantileTarget]> = vec![QuantileTarget::new(0.5, 0.05).unwrap()].into();
        let summary = Arc::new(
            LabeledSummary::new(
                "delay_summary",
                "help",
                targets,
                Duration::from_secs(60),
                4,
                clock.clone(),
            )
            .unwrap(),
        );
        let worker = Arc::new(IngestionWorker::new(
            queue.clone(),
            counts.clone(),
            delays.clone(),
            summary.clone(),
            clock,
        ));
        Fixture {
            queue,
            counts,
            delays,
            summary,
            worker,
        }
    }

    fn delay_series(env: &str) -> Arc<DelaySeries> {
        Arc::new(DelaySeries {
            key: LabelKey::from_pairs([("env", env)]).unwrap(),
            types: MetricType::ALL.to_vec().into(),
            unit: DurationUnit::Millis,
            ring_size: 100,
        })
    }

    #[test]
    fn test_drain_applies_in_order() {
        let f = fixture(10);
        let series = Arc::new(CountSeries {
            index: "requests".to_string(),
            key: LabelKey::from_pairs([("route", "/a")]).unwrap(),
        });

        for op in [CountOp::Increase(5.0), CountOp::Reset(1.0), CountOp::Increase(2.0)] {
            f.queue.push(RecordRequest::Count {
                series: series.clone(),
                op,
            });
        }
        assert_eq!(f.worker.drain(), 3);

        let bean = f.counts.get("requests", &series.key).unwrap();
        assert_eq!(bean.peek(), 3.0);
        assert_eq!(bean.last_update(), 1_000);
    }

    #[test]
    fn test_delay_record_wires_summary_child() {
        let f = fixture(10);
        let series = delay_series("prod");
        for d in [10.0, 20.0] {
            f.queue.push(RecordRequest::Delay {
                series: series.clone(),
                duration: d,
            });
        }
        f.worker.drain();

        let bean = f.delays.get(&series.key).unwrap();
        let child = f.summary.child_for(&series.key).unwrap();
        assert!(Arc::ptr_eq(bean.summary_child().unwrap(), &child));
        assert_eq!(child.count(), 2);
        assert_eq!(bean.take_max(), 20.0);
    }

    #[test]
    fn test_capacity_rejection_does_not_poison_worker() {
        let f = fixture(1);
        f.queue.push(RecordRequest::Delay {
            series: delay_series("prod"),
            duration: 1.0,
        });
        f.queue.push(RecordRequest::Delay {
            series: delay_series("dev"),
            duration: 1.0,
        });
        f.queue.push(RecordRequest::Delay {
            series: delay_series("prod"),
            duration: 7.0,
        });
        assert_eq!(f.worker.drain(), 3);

        assert_eq!(f.delays.len(), 1);
        assert_eq!(f.summary.len(), 1);
        assert_eq!(f.delays.get(&delay_series("prod").key).unwrap().take_max(), 7.0);
    }

    #[tokio::test]
    async fn test_service_applies_until_shutdown() {
        let f = fixture(10);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let worker = f.worker.clone();
        let task = tokio::spawn(async move { worker.start(shutdown_rx).await });

        let series = delay_series("prod");
        f.queue.push(RecordRequest::Delay {
            series: series.clone(),
            duration: 4.0,
        });
        let (tx, rx) = oneshot::channel();
        f.queue.push(RecordRequest::Barrier(tx));
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(f.summary.child_for(&series.key).unwrap().count(), 1);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(f.worker.status(), ServiceStatus::Stopped);
    }
}
