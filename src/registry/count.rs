//! Index- and label-keyed registry of count beans

use std::sync::Arc;

use dashmap::DashMap;

use crate::bean::CountBean;
use crate::error::RegistryError;
use crate::types::{CountOp, LabelKey};

type SeriesMap = DashMap<LabelKey, Arc<CountBean>>;

/// Two-level count registry: index name, then label set
///
/// Index entries are never removed once created, only the beans inside them.
pub struct CountBeanRegistry {
    indexes: DashMap<String, Arc<SeriesMap>>,
    index_capacity: usize,
    series_capacity: usize,
}

/// Live beans of one index after an eviction pass
#[derive(Debug)]
pub struct IndexSweep {
    /// Sanitized index name
    pub index: String,
    /// Beans that survived
    pub live: Vec<Arc<CountBean>>,
    /// Beans removed for inactivity
    pub evicted: usize,
}

impl CountBeanRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    ///
    /// * `index_capacity` - Maximum number of index names
    /// * `series_capacity` - Maximum number of label sets per index
    pub fn new(index_capacity: usize, series_capacity: usize) -> Self {
        Self {
            indexes: DashMap::new(),
            index_capacity,
            series_capacity,
        }
    }

    /// Apply `op` to the bean for `(index, key)`, creating either level if absent
    ///
    /// `index` must already be sanitized.
    pub fn record(
        &self,
        index: &str,
        key: &LabelKey,
        op: CountOp,
        now: u64,
    ) -> Result<(), RegistryError> {
        let series = self.series_map(index)?;

        let existing = series.get(key).map(|b| b.value().clone());
        let bean = match existing {
            Some(bean) => bean,
            None => {
                let size = series.len();
                if size >= self.series_capacity {
                    return Err(RegistryError::SeriesCapacity {
                        index: index.to_string(),
                        size,
                    });
                }
                series
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(CountBean::new(key.clone(), now)))
                    .value()
                    .clone()
            },
        };

        bean.apply(op, now);
        Ok(())
    }

    fn series_map(&self, index: &str) -> Result<Arc<SeriesMap>, RegistryError> {
        if let Some(series) = self.indexes.get(index) {
            return Ok(series.value().clone());
        }

        let size = self.indexes.len();
        if size >= self.index_capacity {
            return Err(RegistryError::IndexCapacity { size });
        }
        Ok(self
            .indexes
            .entry(index.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .value()
            .clone())
    }

    /// Remove expired beans and return the survivors per index
    pub fn sweep(&self, now: u64, expiration_ms: u64) -> Vec<IndexSweep> {
        let indexes: Vec<(String, Arc<SeriesMap>)> = self
            .indexes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        indexes
            .into_iter()
            .map(|(index, series)| {
                let mut live = Vec::with_capacity(series.len());
                let mut evicted = 0;
                series.retain(|_, bean| {
                    if bean.is_expired(now, expiration_ms) {
                        evicted += 1;
                        false
                    } else {
                        live.push(bean.clone());
                        true
                    }
                });
                IndexSweep {
                    index,
                    live,
                    evicted,
                }
            })
            .collect()
    }

    /// Bean for `(index, key)`
    pub fn get(&self, index: &str, key: &LabelKey) -> Option<Arc<CountBean>> {
        self.indexes
            .get(index)
            .and_then(|series| series.get(key).map(|b| b.value().clone()))
    }

    /// Number of index names
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Number of beans across all indexes
    pub fn series_count(&self) -> usize {
        self.indexes.iter().map(|e| e.value().len()).sum()
    }
}
