//! Labeled series collectors
//!
//! A collector owns a family of children, one per distinct [`LabelKey`], and
//! flattens them into [`Sample`]s for the push sink.
//!
//! # Collectors
//!
//! - **`LabeledGauge`**: children hold a single settable value
//! - **`LabeledSummary`**: children hold count, sum and windowed quantiles
//!
//! Children are created lazily through a [`ChildBuilder`]. Building twice with
//! the same label pairs, in any order and from any number of threads, returns
//! the same `Arc`.
//!
//! # Example
//!
//! ```rust
//! use kuba_aggregator::collector::{Collector, LabeledGauge};
//!
//! let gauge = LabeledGauge::new("queue_depth", "Pending items");
//! let child = gauge
//!     .child_builder()
//!     .label_names(["queue"])
//!     .label_values(["ingest"])
//!     .build()
//!     .unwrap();
//! child.set(3.0);
//!
//! let samples = gauge.collect();
//! assert_eq!(samples.len(), 1);
//! assert_eq!(samples[0].value, 3.0);
//! ```

mod gauge;
mod summary;

pub use gauge::{GaugeChild, LabeledGauge};
pub use summary::{LabeledSummary, SummaryChild, SummaryTimer, SummaryValue};

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::LabelError;
use crate::types::{LabelKey, Sample};

/// Kind of series a collector exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    /// One value per child
    Gauge,
    /// One value per child per target quantile
    Summary,
}

/// A named metric family the push sink can drain
pub trait Collector: Send + Sync {
    /// Metric family name
    fn name(&self) -> &str;

    /// Help text
    fn help(&self) -> &str;

    /// Series kind
    fn kind(&self) -> CollectorKind;

    /// Flatten every child into samples
    fn collect(&self) -> Vec<Sample>;
}

/// Atomic get-or-create over label-keyed children
pub trait ChildFactory {
    /// Child type produced
    type Child;

    /// Return the child for `key`, creating it if absent
    fn get_or_create(&self, key: LabelKey) -> Result<Arc<Self::Child>, LabelError>;
}

/// Deferred child lookup
///
/// Accumulates label names and values, then resolves them to a child with
/// [`build`](ChildBuilder::build). Validation happens at build time.
pub struct ChildBuilder<'a, F: ChildFactory + ?Sized> {
    factory: &'a F,
    names: Option<Vec<String>>,
    values: Option<Vec<String>>,
}

impl<'a, F: ChildFactory + ?Sized> ChildBuilder<'a, F> {
    pub(crate) fn new(factory: &'a F) -> Self {
        Self {
            factory,
            names: None,
            values: None,
        }
    }

    /// Set the label names
    pub fn label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the label values, parallel to the names
    pub fn label_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve the label set to a child
    ///
    /// A builder with neither names nor values resolves to the unlabeled child.
    pub fn build(self) -> Result<Arc<F::Child>, LabelError> {
        let key = LabelKey::resolve(self.names, self.values)?;
        self.factory.get_or_create(key)
    }
}

/// Concurrent table of children keyed by label set
pub(crate) struct SeriesFamily<C> {
    children: DashMap<LabelKey, Arc<C>>,
}

impl<C> SeriesFamily<C> {
    pub(crate) fn new() -> Self {
        Self {
            children: DashMap::new(),
        }
    }

    /// Return the child for `key`, creating it under the shard lock if absent
    pub(crate) fn get_or_create<F>(&self, key: LabelKey, make: F) -> Arc<C>
    where
        F: FnOnce(&LabelKey) -> C,
    {
        if let Some(existing) = self.children.get(&key) {
            return existing.value().clone();
        }
        match self.children.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let child = Arc::new(make(entry.key()));
                entry.insert(child.clone());
                child
            },
        }
    }

    /// Remove `child` if it is still the live child for `key`
    pub(crate) fn remove(&self, key: &LabelKey, child: &Arc<C>) -> bool {
        self.children
            .remove_if(key, |_, live| Arc::ptr_eq(live, child))
            .is_some()
    }

    /// Live child for `key`
    pub(crate) fn get(&self, key: &LabelKey) -> Option<Arc<C>> {
        self.children.get(key).map(|c| c.value().clone())
    }

    /// Point-in-time copy of every child
    pub(crate) fn snapshot(&self) -> Vec<(LabelKey, Arc<C>)> {
        self.children
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }
}
