//! Asynchronous record ingestion
//!
//! Recorders enqueue [`RecordRequest`]s and return immediately; a single
//! [`IngestionWorker`] applies them to the registries in order.
//!
//! ```text
//! [Recorders] → [RecordQueue] → [IngestionWorker] → [Registries]
//!                 drop-oldest        one consumer
//! ```

mod queue;
mod request;
mod worker;

pub use queue::RecordQueue;
pub use request::{CountSeries, DelaySeries, RecordRequest};
pub use worker::IngestionWorker;
