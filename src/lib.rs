//! Kuba Aggregator - in-process metrics aggregation with periodic push
//!
//! This library aggregates application measurements inside the process and
//! pushes a compact batch to a metrics backend on a fixed period:
//! - Streaming quantile sketches with configurable rank error bounds
//! - Windowed quantiles over a ring of age buckets
//! - Label-keyed gauge and summary collectors with lock-free child lookup
//! - Bounded count and delay registries with inactivity eviction
//! - Non-blocking recording through a bounded drop-oldest queue

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bean;
pub mod clock;
pub mod collector;
pub mod error;
pub mod quantile;
pub mod registry;
pub mod sink;
pub mod types;

mod atomic;

/// Prometheus self-telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Record queue and the single-consumer ingestion worker
pub mod ingestion;

/// Background services: lifecycle management and the aggregation cycle
pub mod services;

/// The aggregator handle and recorder builders
pub mod aggregator;

// Re-export main types
pub use aggregator::{
    Aggregator, CountRecorder, CountRecorderBuilder, DelayRecorder, DelayRecorderBuilder,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use collector::{Collector, LabeledGauge, LabeledSummary};
pub use config::Config;
pub use error::{Error, LabelError, Result};
pub use quantile::{QuantileSketch, QuantileTarget, WindowedQuantileTracker};
pub use services::CycleReport;
pub use sink::{InMemorySink, LoggingSink, PushSink, SinkError};
pub use types::{CountOp, DurationUnit, LabelKey, MetricType, Sample};
