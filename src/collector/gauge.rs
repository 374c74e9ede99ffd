//! Gauge collector: one settable value per label set

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{ChildBuilder, ChildFactory, Collector, CollectorKind, SeriesFamily};
use crate::atomic::AtomicF64;
use crate::error::LabelError;
use crate::types::{LabelKey, Sample};

/// Gauge family with one settable value per label set
///
/// The aggregation cycle builds a fresh one of these per statistic every
/// cycle, so children never outlive the batch they were pushed in.
pub struct LabeledGauge {
    name: String,
    help: String,
    children: SeriesFamily<GaugeChild>,
}

/// One gauge series
#[derive(Debug)]
pub struct GaugeChild {
    key: LabelKey,
    value: AtomicF64,
}

impl LabeledGauge {
    /// Create an empty gauge family
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            children: SeriesFamily::new(),
        }
    }

    /// Start resolving a child
    pub fn child_builder(&self) -> ChildBuilder<'_, Self> {
        ChildBuilder::new(self)
    }

    /// Child for an already validated key
    pub fn child(&self, key: &LabelKey) -> Arc<GaugeChild> {
        self.children
            .get_or_create(key.clone(), |k| GaugeChild::new(k.clone()))
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the family has no children
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChildFactory for LabeledGauge {
    type Child = GaugeChild;

    fn get_or_create(&self, key: LabelKey) -> Result<Arc<GaugeChild>, LabelError> {
        Ok(self.children.get_or_create(key, |k| GaugeChild::new(k.clone())))
    }
}

impl Collector for LabeledGauge {
    fn name(&self) -> &str {
        &self.name
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn kind(&self) -> CollectorKind {
        CollectorKind::Gauge
    }

    fn collect(&self) -> Vec<Sample> {
        self.children
            .snapshot()
            .into_iter()
            .map(|(key, child)| Sample {
                metric_name: self.name.clone(),
                label_names: key.names().to_vec(),
                label_values: key.values().to_vec(),
                value: child.get(),
            })
            .collect()
    }
}

impl GaugeChild {
    fn new(key: LabelKey) -> Self {
        Self {
            key,
            value: AtomicF64::default(),
        }
    }

    /// Label set of this series
    pub fn key(&self) -> &LabelKey {
        &self.key
    }

    /// Add one
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Add `amount`
    pub fn inc_by(&self, amount: f64) {
        self.value.add(amount);
    }

    /// Subtract one
    pub fn dec(&self) {
        self.value.add(-1.0);
    }

    /// Subtract `amount`
    pub fn dec_by(&self, amount: f64) {
        self.value.add(-amount);
    }

    /// Overwrite the value
    pub fn set(&self, value: f64) {
        self.value.set(value);
    }

    /// Set to the current Unix time in seconds
    pub fn set_to_current_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.value.set(now);
    }

    /// Current value
    pub fn get(&self) -> f64 {
        self.value.get()
    }
}
