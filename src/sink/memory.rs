//! In-memory sink for tests and embedding

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{PushSink, SinkError};
use crate::collector::{Collector, CollectorKind};
use crate::types::Sample;

/// One batch received by an [`InMemorySink`]
#[derive(Debug, Clone)]
pub struct PushedBatch {
    /// Job identifier
    pub job: String,
    /// `(name, kind)` of every collector, in push order
    pub collectors: Vec<(String, CollectorKind)>,
    /// Every sample collected at push time
    pub samples: Vec<Sample>,
}

impl PushedBatch {
    /// Samples of one metric family
    pub fn samples_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples.iter().filter(move |s| s.metric_name == name)
    }

    /// Value of the sample in `name` whose labels include every pair in `labels`
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.samples_named(name)
            .find(|s| labels.iter().all(|(k, v)| s.label(k) == Some(*v)))
            .map(|s| s.value)
    }
}

/// Sink that keeps everything it receives
///
/// Collectors are drained into [`Sample`]s at push time, so later mutation of
/// a persistent collector does not alter recorded batches.
#[derive(Default)]
pub struct InMemorySink {
    batches: Mutex<Vec<PushedBatch>>,
    deleted: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl InMemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every batch received so far
    pub fn batches(&self) -> Vec<PushedBatch> {
        self.batches.lock().clone()
    }

    /// The most recent batch
    pub fn last_batch(&self) -> Option<PushedBatch> {
        self.batches.lock().last().cloned()
    }

    /// Jobs deleted so far, in call order
    pub fn deleted_jobs(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("sink is set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PushSink for InMemorySink {
    async fn push_batch(
        &self,
        job: &str,
        collectors: &[Arc<dyn Collector>],
    ) -> Result<(), SinkError> {
        self.check()?;

        let batch = PushedBatch {
            job: job.to_string(),
            collectors: collectors
                .iter()
                .map(|c| (c.name().to_string(), c.kind()))
                .collect(),
            samples: collectors.iter().flat_map(|c| c.collect()).collect(),
        };
        self.batches.lock().push(batch);
        Ok(())
    }

    async fn delete_job(&self, job: &str) -> Result<(), SinkError> {
        self.check()?;
        self.deleted.lock().push(job.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::LabeledGauge;

    #[tokio::test]
    async fn test_records_batches_and_deletes() {
        let sink = InMemorySink::new();
        let gauge = Arc::new(LabeledGauge::new("delay_max", "help"));
        gauge
            .child_builder()
            .label_names(["env"])
            .label_values(["prod"])
            .build()
            .unwrap()
            .set(30.0);
        let collectors: Vec<Arc<dyn Collector>> = vec![gauge];

        sink.delete_job("svc/1").await.unwrap();
        sink.push_batch("svc/1", &collectors).await.unwrap();

        let batch = sink.last_batch().unwrap();
        assert_eq!(batch.job, "svc/1");
        assert_eq!(
            batch.collectors,
            vec![("delay_max".to_string(), CollectorKind::Gauge)]
        );
        assert_eq!(batch.value("delay_max", &[("env", "prod")]), Some(30.0));
        assert_eq!(sink.deleted_jobs(), vec!["svc/1".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_sink_records_nothing() {
        let sink = InMemorySink::new();
        sink.set_failing(true);

        assert!(sink.push_batch("job", &[]).await.is_err());
        assert!(sink.delete_job("job").await.is_err());
        assert!(sink.batches().is_empty());
        assert!(sink.deleted_jobs().is_empty());

        sink.set_failing(false);
        sink.push_batch("job", &[]).await.unwrap();
        assert_eq!(sink.batches().len(), 1);
    }
}
