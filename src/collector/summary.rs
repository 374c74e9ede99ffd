//! Summary collector: count, sum and windowed quantiles per label set

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ChildBuilder, ChildFactory, Collector, CollectorKind, SeriesFamily};
use crate::atomic::AtomicF64;
use crate::clock::SharedClock;
use crate::error::{LabelError, ValidationError};
use crate::quantile::{QuantileTarget, WindowedQuantileTracker};
use crate::types::{format_quantile, LabelKey, Sample, QUANTILE_LABEL};

/// Summary family with windowed quantiles per label set
///
/// Unlike the gauges, this collector lives as long as the aggregator: its
/// children accumulate across cycles and only go away through
/// [`remove_child`](LabeledSummary::remove_child).
pub struct LabeledSummary {
    name: String,
    help: String,
    targets: Arc<[QuantileTarget]>,
    window: Duration,
    buckets: usize,
    clock: SharedClock,
    children: SeriesFamily<SummaryChild>,
}

/// One summary series
pub struct SummaryChild {
    key: LabelKey,
    count: AtomicU64,
    sum: AtomicF64,
    tracker: Option<WindowedQuantileTracker>,
    created_ms: u64,
}

/// Point-in-time view of a summary child
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryValue {
    /// Observations since creation
    pub count: u64,
    /// Sum of observations since creation
    pub sum: f64,
    /// `(target, estimate)` per configured quantile, over the retention window
    pub quantiles: Vec<(f64, f64)>,
    /// Creation time in Unix milliseconds
    pub created_ms: u64,
}

impl LabeledSummary {
    /// Create an empty summary family
    ///
    /// Fails when the window cannot be split into `buckets` rotation steps.
    /// With no targets, children track only count and sum.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        targets: Arc<[QuantileTarget]>,
        window: Duration,
        buckets: usize,
        clock: SharedClock,
    ) -> Result<Self, ValidationError> {
        if !targets.is_empty() {
            WindowedQuantileTracker::new(targets.clone(), window, buckets, clock.clone())?;
        }

        Ok(Self {
            name: name.into(),
            help: help.into(),
            targets,
            window,
            buckets,
            clock,
            children: SeriesFamily::new(),
        })
    }

    /// Start resolving a child
    pub fn child_builder(&self) -> ChildBuilder<'_, Self> {
        ChildBuilder::new(self)
    }

    /// Live child for a label set, without creating one
    pub fn child_for(&self, key: &LabelKey) -> Option<Arc<SummaryChild>> {
        self.children.get(key)
    }

    /// Drop a child from the family
    ///
    /// Returns false when `child` is no longer the live child for its labels.
    /// The label set is read from the child itself, so lookup and removal
    /// cannot disagree.
    pub fn remove_child(&self, child: &Arc<SummaryChild>) -> bool {
        self.children.remove(child.key(), child)
    }

    /// Configured quantile targets
    pub fn targets(&self) -> &[QuantileTarget] {
        &self.targets
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the family has no children
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_child(&self, key: &LabelKey) -> SummaryChild {
        // Parameters were validated in `new`
        let tracker = if self.targets.is_empty() {
            None
        } else {
            WindowedQuantileTracker::new(
                self.targets.clone(),
                self.window,
                self.buckets,
                self.clock.clone(),
            )
            .ok()
        };

        SummaryChild {
            key: key.clone(),
            count: AtomicU64::new(0),
            sum: AtomicF64::default(),
            tracker,
            created_ms: self.clock.now_millis(),
        }
    }
}

impl ChildFactory for LabeledSummary {
    type Child = SummaryChild;

    fn get_or_create(&self, key: LabelKey) -> Result<Arc<SummaryChild>, LabelError> {
        if key.get(QUANTILE_LABEL).is_some() {
            return Err(LabelError::ReservedName(QUANTILE_LABEL.to_string()));
        }
        Ok(self.children.get_or_create(key, |k| self.make_child(k)))
    }
}

impl Collector for LabeledSummary {
    fn name(&self) -> &str {
        &self.name
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn kind(&self) -> CollectorKind {
        CollectorKind::Summary
    }

    fn collect(&self) -> Vec<Sample> {
        let mut samples = Vec::new();
        for (key, child) in self.children.snapshot() {
            let Some(tracker) = child.tracker.as_ref() else {
                continue;
            };
            for (q, estimate) in tracker.snapshot() {
                let mut label_names = key.names().to_vec();
                let mut label_values = key.values().to_vec();
                label_names.push(QUANTILE_LABEL.to_string());
                label_values.push(format_quantile(q));
                samples.push(Sample {
                    metric_name: self.name.clone(),
                    label_names,
                    label_values,
                    value: estimate,
                });
            }
        }
        samples
    }
}

impl fmt::Debug for SummaryChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryChild")
            .field("key", &self.key)
            .field("count", &self.count())
            .field("sum", &self.sum())
            .field("created_ms", &self.created_ms)
            .finish_non_exhaustive()
    }
}

impl SummaryChild {
    /// Label set of this series
    pub fn key(&self) -> &LabelKey {
        &self.key
    }

    /// Record one observation
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        if let Some(tracker) = &self.tracker {
            tracker.insert(value);
        }
    }

    /// Observations since creation
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observations since creation
    pub fn sum(&self) -> f64 {
        self.sum.get()
    }

    /// Snapshot count, sum and every quantile estimate
    pub fn value(&self) -> SummaryValue {
        SummaryValue {
            count: self.count(),
            sum: self.sum(),
            quantiles: self
                .tracker
                .as_ref()
                .map(|t| t.snapshot())
                .unwrap_or_default(),
            created_ms: self.created_ms,
        }
    }

    /// Start a timer that observes elapsed milliseconds when dropped
    pub fn start_timer(&self) -> SummaryTimer<'_> {
        SummaryTimer {
            child: self,
            start: Instant::now(),
            observed: false,
        }
    }

    /// Run `f` and observe how long it took, in milliseconds
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _timer = self.start_timer();
        f()
    }
}

/// Drop guard returned by [`SummaryChild::start_timer`]
pub struct SummaryTimer<'a> {
    child: &'a SummaryChild,
    start: Instant,
    observed: bool,
}

impl SummaryTimer<'_> {
    /// Observe now and return the elapsed milliseconds
    pub fn observe_duration(mut self) -> f64 {
        self.observe()
    }

    fn observe(&mut self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64() * 1_000.0;
        if !self.observed {
            self.observed = true;
            self.child.observe(elapsed);
        }
        elapsed
    }
}

impl Drop for SummaryTimer<'_> {
    fn drop(&mut self) {
        self.observe();
    }
}
