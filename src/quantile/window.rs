//! Time-windowed quantile tracking
//!
//! A ring of [`QuantileSketch`] buckets staggered in age. Every observation goes
//! into every bucket; queries read the bucket about to be replaced, which has
//! seen the longest stretch of history. Each bucket is cleared once per window,
//! so a query covers between `window - window / buckets` and `window` of data.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::sketch::{QuantileSketch, QuantileTarget};
use crate::clock::SharedClock;
use crate::error::ValidationError;

/// Quantile estimates over a sliding time window
pub struct WindowedQuantileTracker {
    ring: Mutex<Ring>,
    clock: SharedClock,
}

struct Ring {
    targets: Arc<[QuantileTarget]>,
    buckets: Vec<QuantileSketch>,
    current: usize,
    last_rotation_ms: u64,
    rotation_ms: u64,
}

impl WindowedQuantileTracker {
    /// Create a tracker over `window`, split into `buckets` age buckets
    ///
    /// Fails when the window or bucket count is zero, or when the window is too
    /// short to give every bucket at least one millisecond.
    pub fn new(
        targets: Arc<[QuantileTarget]>,
        window: Duration,
        buckets: usize,
        clock: SharedClock,
    ) -> Result<Self, ValidationError> {
        let window_ms = window.as_millis() as u64;
        if window_ms == 0 {
            return Err(ValidationError::out_of_range("window_ms", 0, 1, u64::MAX));
        }
        if buckets == 0 {
            return Err(ValidationError::out_of_range("buckets", 0, 1, usize::MAX));
        }
        let rotation_ms = window_ms / buckets as u64;
        if rotation_ms == 0 {
            return Err(ValidationError::InvalidFormat {
                field: "window_ms".to_string(),
                message: format!("{} ms cannot be split into {} buckets", window_ms, buckets),
            });
        }

        let ring = Ring {
            buckets: (0..buckets)
                .map(|_| QuantileSketch::new(targets.clone()))
                .collect(),
            targets,
            current: 0,
            last_rotation_ms: clock.now_millis(),
            rotation_ms,
        };

        Ok(Self {
            ring: Mutex::new(ring),
            clock,
        })
    }

    /// Record an observation in every live bucket
    pub fn insert(&self, value: f64) {
        let now = self.clock.now_millis();
        let mut ring = self.ring.lock();
        ring.rotate(now);
        for bucket in ring.buckets.iter_mut() {
            bucket.insert(value);
        }
    }

    /// Estimate quantile `q` from the oldest live bucket
    ///
    /// Returns NaN when that bucket holds no observations.
    pub fn get(&self, q: f64) -> f64 {
        let now = self.clock.now_millis();
        let mut ring = self.ring.lock();
        ring.rotate(now);
        let current = ring.current;
        ring.buckets[current].get(q)
    }

    /// Estimate every configured target under one lock
    pub fn snapshot(&self) -> Vec<(f64, f64)> {
        let now = self.clock.now_millis();
        let mut ring = self.ring.lock();
        ring.rotate(now);

        let targets = ring.targets.clone();
        let current = ring.current;
        targets
            .iter()
            .map(|t| (t.quantile(), ring.buckets[current].get(t.quantile())))
            .collect()
    }

    /// Configured targets
    pub fn targets(&self) -> Arc<[QuantileTarget]> {
        self.ring.lock().targets.clone()
    }

    /// Time between bucket rotations
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_millis(self.ring.lock().rotation_ms)
    }
}

impl Ring {
    /// Replace every bucket whose lifetime ended before `now`
    ///
    /// Advances the rotation timestamp in whole rotation steps, never straight
    /// to `now`, so the phase survives long idle gaps.
    fn rotate(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_rotation_ms);
        if elapsed <= self.rotation_ms {
            return;
        }

        // Smallest step count leaving at most one rotation interval elapsed
        let steps = (elapsed - 1) / self.rotation_ms;
        let len = self.buckets.len() as u64;

        if steps >= len {
            for bucket in self.buckets.iter_mut() {
                *bucket = QuantileSketch::new(self.targets.clone());
            }
        } else {
            for i in 0..steps {
                let idx = (self.current + i as usize) % self.buckets.len();
                self.buckets[idx] = QuantileSketch::new(self.targets.clone());
            }
        }

        self.current = ((self.current as u64 + steps) % len) as usize;
        self.last_rotation_ms += steps * self.rotation_ms;
    }
}
