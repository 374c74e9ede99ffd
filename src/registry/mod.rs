//! Bounded concurrent bean registries
//!
//! The ingestion worker is the only writer; the aggregation cycle scans and
//! evicts concurrently. Both maps are `DashMap`s, so the scanner never blocks
//! the writer for longer than one shard.
//!
//! Capacity ceilings are checked before a new entry is created. A record that
//! would exceed a ceiling is rejected with a [`RegistryError`](crate::error::RegistryError);
//! existing series are never evicted to make room.

mod count;
mod delay;

pub use count::{CountBeanRegistry, IndexSweep};
pub use delay::{DelayBeanRegistry, DelaySweep};
