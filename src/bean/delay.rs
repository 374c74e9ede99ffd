//! Per-series delay statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::ring::BoundedRing;
use crate::collector::SummaryChild;
use crate::types::{DurationUnit, LabelKey, MetricType};

/// Aggregate state for one delay series
///
/// Max, min, average and variance are per-cycle: reading them clears them.
/// The summary child is cumulative and is only ever fed, never reset here.
pub struct DelayBean {
    key: LabelKey,
    types: Vec<MetricType>,
    unit: DurationUnit,
    stats: Mutex<DelayStats>,
    summary: Option<Arc<SummaryChild>>,
    last_update: AtomicU64,
}

struct DelayStats {
    max: f64,
    min: f64,
    /// Distinguishes a real minimum of 0 from "nothing observed"
    has_min: bool,
    avg: BoundedRing,
    variance: BoundedRing,
}

/// Per-cycle statistics read out of a [`DelayBean`]
///
/// Each field is `None` when the bean does not track that statistic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DelaySnapshot {
    /// Largest observation since the last read
    pub max: Option<f64>,
    /// Smallest observation since the last read
    pub min: Option<f64>,
    /// Mean of the recent-value ring
    pub avg: Option<f64>,
    /// Population variance of the recent-value ring
    pub variance: Option<f64>,
}

impl DelayBean {
    /// Create an empty bean
    ///
    /// `summary` is the series' summary child; it is ignored unless `types`
    /// includes [`MetricType::Summary`].
    pub fn new(
        key: LabelKey,
        types: &[MetricType],
        unit: DurationUnit,
        ring_size: usize,
        summary: Option<Arc<SummaryChild>>,
        now: u64,
    ) -> Self {
        let mut tracked: Vec<MetricType> = Vec::with_capacity(types.len());
        for t in types {
            if !tracked.contains(t) {
                tracked.push(*t);
            }
        }

        let summary = if tracked.contains(&MetricType::Summary) {
            summary
        } else {
            None
        };
        let ring_capacity = |t: MetricType| if tracked.contains(&t) { ring_size } else { 0 };

        let stats = DelayStats {
            max: 0.0,
            min: f64::MAX,
            has_min: false,
            avg: BoundedRing::new(ring_capacity(MetricType::Avg)),
            variance: BoundedRing::new(ring_capacity(MetricType::Variance)),
        };

        Self {
            key,
            types: tracked,
            unit,
            stats: Mutex::new(stats),
            summary,
            last_update: AtomicU64::new(now),
        }
    }

    /// Label set of this series
    pub fn key(&self) -> &LabelKey {
        &self.key
    }

    /// Statistics this bean tracks
    pub fn types(&self) -> &[MetricType] {
        &self.types
    }

    /// Whether a statistic is tracked
    pub fn tracks(&self, t: MetricType) -> bool {
        self.types.contains(&t)
    }

    /// Unit recorded durations arrive in
    pub fn unit(&self) -> DurationUnit {
        self.unit
    }

    /// Cumulative summary child, when tracked
    pub fn summary_child(&self) -> Option<&Arc<SummaryChild>> {
        self.summary.as_ref()
    }

    /// Feed one duration into every tracked statistic
    ///
    /// The duration is converted to milliseconds once, up front.
    pub fn record_duration(&self, duration: f64, now: u64) {
        let millis = self.unit.to_millis(duration);

        {
            let mut stats = self.stats.lock();
            for t in &self.types {
                match t {
                    MetricType::Max => stats.max = stats.max.max(millis),
                    MetricType::Min => {
                        stats.min = stats.min.min(millis);
                        stats.has_min = true;
                    },
                    MetricType::Avg => stats.avg.push(millis),
                    MetricType::Variance => stats.variance.push(millis),
                    MetricType::Summary => {},
                }
            }
        }

        if let Some(summary) = &self.summary {
            summary.observe(millis);
        }
        self.last_update.store(now, Ordering::Release);
    }

    /// Read and reset the maximum; 0 when nothing was observed
    pub fn take_max(&self) -> f64 {
        std::mem::replace(&mut self.stats.lock().max, 0.0)
    }

    /// Read and reset the minimum; 0 when nothing was observed
    pub fn take_min(&self) -> f64 {
        self.stats.lock().take_min()
    }

    /// Read the ring mean and clear the ring
    pub fn take_avg(&self) -> f64 {
        let mut stats = self.stats.lock();
        let avg = stats.avg.mean();
        stats.avg.clear();
        avg
    }

    /// Read the ring variance and clear the ring
    pub fn take_variance(&self) -> f64 {
        let mut stats = self.stats.lock();
        let variance = stats.variance.variance();
        stats.variance.clear();
        variance
    }

    /// Read and reset every tracked per-cycle statistic under one lock
    pub fn take_snapshot(&self) -> DelaySnapshot {
        let mut stats = self.stats.lock();
        let mut snapshot = DelaySnapshot::default();

        for t in &self.types {
            match t {
                MetricType::Max => {
                    snapshot.max = Some(std::mem::replace(&mut stats.max, 0.0));
                },
                MetricType::Min => snapshot.min = Some(stats.take_min()),
                MetricType::Avg => {
                    snapshot.avg = Some(stats.avg.mean());
                    stats.avg.clear();
                },
                MetricType::Variance => {
                    snapshot.variance = Some(stats.variance.variance());
                    stats.variance.clear();
                },
                MetricType::Summary => {},
            }
        }

        snapshot
    }

    /// Unix milliseconds of the last observation
    pub fn last_update(&self) -> u64 {
        self.last_update.load(Ordering::Acquire)
    }

    /// Whether the bean has gone unused for longer than `expiration_ms`
    pub fn is_expired(&self, now: u64, expiration_ms: u64) -> bool {
        super::is_expired(self.last_update(), now, expiration_ms)
    }
}

impl DelayStats {
    fn take_min(&mut self) -> f64 {
        let min = if self.has_min { self.min } else { 0.0 };
        self.min = f64::MAX;
        self.has_min = false;
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collector::{ChildFactory, LabeledSummary};
    use crate::quantile::QuantileTarget;
    use std::time::Duration;

    fn key() -> LabelKey {
        LabelKey::from_pairs([("env", "prod")]).unwrap()
    }

    fn bean(types: &[MetricType]) -> DelayBean {
        DelayBean::new(key(), types, DurationUnit::Millis, 100, None, 0)
    }

    #[test]
    fn test_reads_clear_per_cycle_statistics() {
        let bean = bean(&MetricType::ALL);
        for v in [10.0, 20.0, 30.0] {
            bean.record_duration(v, 1);
        }

        assert_eq!(bean.take_max(), 30.0);
        assert_eq!(bean.take_min(), 10.0);
        assert_eq!(bean.take_avg(), 20.0);
        assert!((bean.take_variance() - 200.0 / 3.0).abs() < 1e-9);

        assert_eq!(bean.take_max(), 0.0);
        assert_eq!(bean.take_min(), 0.0);
        assert_eq!(bean.take_avg(), 0.0);
        assert_eq!(bean.take_variance(), 0.0);
    }

    #[test]
    fn test_zero_is_a_real_minimum() {
        let bean = bean(&[MetricType::Min]);
        bean.record_duration(0.0, 1);
        bean.record_duration(5.0, 2);
        assert_eq!(bean.take_min(), 0.0);

        bean.record_duration(5.0, 3);
        assert_eq!(bean.take_min(), 5.0);
    }

    #[test]
    fn test_unit_converted_once() {
        let bean = DelayBean::new(
            key(),
            &[MetricType::Max, MetricType::Avg],
            DurationUnit::Nanos,
            100,
            None,
            0,
        );
        bean.record_duration(2_500_000.0, 1);
        bean.record_duration(500_000.0, 1);

        let snapshot = bean.take_snapshot();
        assert_eq!(snapshot.max, Some(2.5));
        assert_eq!(snapshot.avg, Some(1.5));
        assert_eq!(snapshot.min, None);
        assert_eq!(snapshot.variance, None);
    }

    #[test]
    fn test_untracked_rings_stay_empty() {
        let bean = bean(&[MetricType::Max]);
        bean.record_duration(4.0, 1);
        assert_eq!(bean.take_avg(), 0.0);
        assert_eq!(bean.types(), &[MetricType::Max]);
    }

    #[test]
    fn test_summary_is_cumulative() {
        let clock = Arc::new(ManualClock::new(0));
        let targets: Arc<[QuantileTarget]> = vec![QuantileTarget::new(0.5, 0.05).unwrap()].into();
        let summary =
            LabeledSummary::new("s", "h", targets, Duration::from_secs(60), 4, clock).unwrap();
        let child = summary.get_or_create(key()).unwrap();

        let bean = DelayBean::new(
            key(),
            &MetricType::ALL,
            DurationUnit::Millis,
            100,
            Some(child.clone()),
            0,
        );
        bean.record_duration(10.0, 1);
        bean.take_snapshot();
        bean.record_duration(20.0, 2);
        bean.take_snapshot();

        assert_eq!(child.count(), 2);
        assert_eq!(child.sum(), 30.0);
    }

    #[test]
    fn test_summary_dropped_when_not_tracked() {
        let clock = Arc::new(ManualClock::new(0));
        let summary = LabeledSummary::new(
            "s",
            "h",
            Vec::new().into(),
            Duration::from_secs(60),
            4,
            clock,
        )
        .unwrap();
        let child = summary.get_or_create(key()).unwrap();

        let bean = DelayBean::new(
            key(),
            &[MetricType::Max],
            DurationUnit::Millis,
            100,
            Some(child.clone()),
            0,
        );
        bean.record_duration(10.0, 1);
        assert!(bean.summary_child().is_none());
        assert_eq!(child.count(), 0);
    }

    #[test]
    fn test_last_update_advances() {
        let bean = bean(&[MetricType::Max]);
        bean.record_duration(1.0, 5_000);
        assert_eq!(bean.last_update(), 5_000);
        assert!(bean.is_expired(15_001, 10_000));
    }
}
