//! Background Services Module
//!
//! The aggregator runs two long-lived services side by side:
//!
//! ```text
//!  producers ──▶ RecordQueue ──▶ IngestionWorker ──▶ bean registries
//!                                                        │
//!                                  AggregationCycle ◀────┘ ──▶ PushSink
//! ```
//!
//! - **ServiceManager**: Starts and stops the services together
//! - **IngestionWorker**: Applies queued records to the registries in order
//!   (lives in [`crate::ingestion`])
//! - **AggregationCycle**: Snapshots the registries and pushes a batch on a
//!   fixed period
//!
//! # Example
//!
//! ```rust
//! use kuba_aggregator::services::{ServiceConfig, ServiceManager};
//!
//! let manager = ServiceManager::new(ServiceConfig::default());
//! assert!(!manager.is_running()); // Nothing started yet
//! ```

pub mod cycle;
pub mod framework;

pub use cycle::{AggregationCycle, CycleConfig, CycleReport};
pub use framework::{Service, ServiceConfig, ServiceError, ServiceManager, ServiceStatus};
