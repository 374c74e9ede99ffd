//! Label-keyed registry of delay beans

use std::sync::Arc;

use dashmap::DashMap;

use crate::bean::DelayBean;
use crate::collector::LabeledSummary;
use crate::error::RegistryError;
use crate::types::LabelKey;

/// Delay registry keyed by label set
pub struct DelayBeanRegistry {
    beans: DashMap<LabelKey, Arc<DelayBean>>,
    capacity: usize,
}

/// Result of one eviction pass over the delay registry
#[derive(Default)]
pub struct DelaySweep {
    /// Beans that survived
    pub live: Vec<Arc<DelayBean>>,
    /// Beans removed for inactivity
    pub evicted: Vec<Arc<DelayBean>>,
}

impl DelayBeanRegistry {
    /// Create an empty registry holding at most `capacity` series
    pub fn new(capacity: usize) -> Self {
        Self {
            beans: DashMap::new(),
            capacity,
        }
    }

    /// Record a duration on the bean for `key`
    ///
    /// `create` builds the bean when the series is new; it runs at most once
    /// and only when the registry has room.
    pub fn record<F>(
        &self,
        key: &LabelKey,
        duration: f64,
        now: u64,
        create: F,
    ) -> Result<(), RegistryError>
    where
        F: FnOnce() -> DelayBean,
    {
        let existing = self.beans.get(key).map(|b| b.value().clone());
        let bean = match existing {
            Some(bean) => bean,
            None => {
                let size = self.beans.len();
                if size >= self.capacity {
                    return Err(RegistryError::SeriesCapacity {
                        index: "delay".to_string(),
                        size,
                    });
                }
                self.beans
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(create()))
                    .value()
                    .clone()
            },
        };

        bean.record_duration(duration, now);
        Ok(())
    }

    /// Remove expired beans, returning both the survivors and the evicted
    ///
    /// An evicted bean's summary child leaves `summary` while the bean's shard
    /// is still locked. A record for the same labels therefore either lands
    /// before the eviction or creates both a new bean and a new child.
    pub fn sweep(&self, now: u64, expiration_ms: u64, summary: &LabeledSummary) -> DelaySweep {
        let mut sweep = DelaySweep::default();
        self.beans.retain(|_, bean| {
            if bean.is_expired(now, expiration_ms) {
                if let Some(child) = bean.summary_child() {
                    summary.remove_child(child);
                }
                sweep.evicted.push(bean.clone());
                false
            } else {
                sweep.live.push(bean.clone());
                true
            }
        });
        sweep
    }

    /// Bean for `key`
    pub fn get(&self, key: &LabelKey) -> Option<Arc<DelayBean>> {
        self.beans.get(key).map(|b| b.value().clone())
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.beans.len()
    }

    /// Whether no series are tracked
    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}
