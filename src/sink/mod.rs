//! Push sink interface
//!
//! The aggregation cycle hands every finished batch to a [`PushSink`]. The
//! sink owns transport and encoding; the core only sees success or a
//! [`SinkError`], which it logs and otherwise ignores.

mod logging;
mod memory;

pub use crate::error::SinkError;
pub use logging::LoggingSink;
pub use memory::{InMemorySink, PushedBatch};

use std::sync::Arc;

use crate::collector::Collector;

/// Destination for aggregated batches
#[async_trait::async_trait]
pub trait PushSink: Send + Sync {
    /// Add or replace the series in `collectors` under `job`
    async fn push_batch(&self, job: &str, collectors: &[Arc<dyn Collector>])
        -> Result<(), SinkError>;

    /// Drop every series previously pushed under `job`
    async fn delete_job(&self, job: &str) -> Result<(), SinkError>;
}
