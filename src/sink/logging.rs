//! Sink that writes every pushed sample to the log

use std::sync::Arc;

use tracing::debug;

use super::{PushSink, SinkError};
use crate::collector::Collector;

/// Sink that writes every sample to the `tracing` log at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait::async_trait]
impl PushSink for LoggingSink {
    async fn push_batch(
        &self,
        job: &str,
        collectors: &[Arc<dyn Collector>],
    ) -> Result<(), SinkError> {
        for collector in collectors {
            for sample in collector.collect() {
                let labels: Vec<String> = sample
                    .label_names
                    .iter()
                    .zip(&sample.label_values)
                    .map(|(n, v)| format!("{}={}", n, v))
                    .collect();
                debug!(
                    job,
                    metric = %sample.metric_name,
                    labels = %labels.join(","),
                    value = sample.value,
                    "Pushed sample"
                );
            }
        }
        Ok(())
    }

    async fn delete_job(&self, job: &str) -> Result<(), SinkError> {
        debug!(job, "Deleted job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::LabeledGauge;

    #[tokio::test]
    async fn test_never_fails() {
        let gauge = Arc::new(LabeledGauge::new("requests", "help"));
        gauge
            .child_builder()
            .label_names(["route"])
            .label_values(["/a"])
            .build()
            .unwrap()
            .set(1.0);
        let collectors: Vec<Arc<dyn Collector>> = vec![gauge];

        LoggingSink.push_batch("job", &collectors).await.unwrap();
        LoggingSink.delete_job("job").await.unwrap();
    }
}
