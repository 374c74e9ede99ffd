//! Record requests carried by the ingestion queue

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::types::{CountOp, DurationUnit, LabelKey, MetricType};

/// Identity of a count series, shared by every record a recorder sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSeries {
    /// Sanitized index name
    pub index: String,
    /// Label set
    pub key: LabelKey,
}

/// Identity and bean settings of a delay series
#[derive(Debug, Clone)]
pub struct DelaySeries {
    /// Label set
    pub key: LabelKey,
    /// Statistics to track
    pub types: Arc<[MetricType]>,
    /// Unit recorded durations arrive in
    pub unit: DurationUnit,
    /// Capacity of the average and variance rings
    pub ring_size: usize,
}

/// One unit of work for the ingestion worker
#[derive(Debug)]
pub enum RecordRequest {
    /// Mutate a count series
    Count {
        /// Target series
        series: Arc<CountSeries>,
        /// Mutation
        op: CountOp,
    },
    /// Record a duration on a delay series
    Delay {
        /// Target series
        series: Arc<DelaySeries>,
        /// Duration in the series' unit
        duration: f64,
    },
    /// Signalled once every earlier request has been applied
    Barrier(oneshot::Sender<()>),
}

impl RecordRequest {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RecordRequest::Count { .. } => "count",
            RecordRequest::Delay { .. } => "delay",
            RecordRequest::Barrier(_) => "barrier",
        }
    }
}
