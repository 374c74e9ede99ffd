//! Targeted-quantile streaming sketch
//!
//! Biased-quantile summary in the style of Cormode, Korn, Muthukrishnan and
//! Srivastava ("Effective Computation of Biased Quantiles over Data Streams").
//! The sketch keeps a value-sorted list of items, each carrying:
//!
//! - `g`: rank width covered by the item relative to its predecessor
//! - `delta`: maximum extra rank uncertainty of the item
//!
//! so that the sum of `g` over a prefix is a lower bound on rank. For each
//! configured `(quantile, error)` target, the rank reported for that quantile
//! stays within `error * n + 1` of `quantile * n`.
//!
//! # Buffering
//!
//! Observations land in a small unsorted buffer first. When the buffer fills
//! (and before every query) it is sorted and merged into the item list in a
//! single pass, then the list is compressed.

use std::sync::Arc;

use crate::error::ValidationError;

/// Default number of observations buffered before a merge
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

/// Fraction of each target's error budget the sketch works against. Later
/// insertions shift an item's rank, and the allowance at its new rank can be
/// smaller than the one it was merged under.
const INVARIANT_HEADROOM: f64 = 0.5;

/// One quantile the sketch must answer within a rank error bound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantileTarget {
    quantile: f64,
    error: f64,
    /// Error slope for ranks at or below the target
    u: f64,
    /// Error slope for ranks above the target
    v: f64,
}

impl QuantileTarget {
    /// Define a target; both the quantile and the error must lie in `[0, 1]`
    pub fn new(quantile: f64, error: f64) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(ValidationError::out_of_range("quantile", quantile, 0.0, 1.0));
        }
        if !(0.0..=1.0).contains(&error) {
            return Err(ValidationError::out_of_range("error", error, 0.0, 1.0));
        }

        Ok(Self {
            quantile,
            error,
            u: 2.0 * error / (1.0 - quantile),
            v: 2.0 * error / quantile,
        })
    }

    /// Target quantile in `[0, 1]`
    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    /// Allowed rank error as a fraction of the observation count
    pub fn error(&self) -> f64 {
        self.error
    }
}

#[derive(Debug, Clone, Copy)]
struct Item {
    value: f64,
    g: u64,
    delta: u64,
}

/// Streaming quantile sketch over one unbounded value stream
///
/// Not synchronized; [`super::WindowedQuantileTracker`] owns sketches behind a lock.
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    targets: Arc<[QuantileTarget]>,
    samples: Vec<Item>,
    buffer: Vec<f64>,
    buffer_capacity: usize,
    count: u64,
}

impl QuantileSketch {
    /// Create a sketch answering the given targets
    pub fn new(targets: Arc<[QuantileTarget]>) -> Self {
        Self::with_buffer_capacity(targets, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a sketch with a custom insertion buffer size
    pub fn with_buffer_capacity(targets: Arc<[QuantileTarget]>, buffer_capacity: usize) -> Self {
        let buffer_capacity = buffer_capacity.max(1);
        Self {
            targets,
            samples: Vec::new(),
            buffer: Vec::with_capacity(buffer_capacity),
            buffer_capacity,
            count: 0,
        }
    }

    /// Record an observation; NaN is ignored
    pub fn insert(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }

        self.buffer.push(value);
        if self.buffer.len() >= self.buffer_capacity {
            self.flush();
        }
    }

    /// Estimate the value at quantile `q`
    ///
    /// Returns NaN when nothing has been observed.
    pub fn get(&mut self, q: f64) -> f64 {
        self.flush();

        let (first, rest) = match self.samples.split_first() {
            Some(split) => split,
            None => return f64::NAN,
        };

        let desired = (q * self.count as f64).floor();
        let bound = desired + self.allowable_error(desired) / 2.0;

        let mut rank_min = 0u64;
        let mut prev = first;
        for cur in rest {
            rank_min += prev.g;
            if (rank_min + cur.g + cur.delta) as f64 > bound {
                return prev.value;
            }
            prev = cur;
        }

        prev.value
    }

    /// Merge buffered observations and compress
    pub fn flush(&mut self) {
        if self.insert_batch() {
            self.compress();
        }
    }

    /// Observations recorded, including buffered ones
    pub fn count(&self) -> u64 {
        self.count + self.buffer.len() as u64
    }

    /// Whether nothing has been observed
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Items currently retained (excluding the buffer)
    pub fn retained(&self) -> usize {
        self.samples.len()
    }

    /// Configured targets
    pub fn targets(&self) -> &[QuantileTarget] {
        &self.targets
    }

    /// Largest rank width an item at `rank` may cover
    ///
    /// Minimum over all targets of `u * (n - rank)` below the target rank and
    /// `v * rank` above it, scaled by [`INVARIANT_HEADROOM`].
    fn allowable_error(&self, rank: f64) -> f64 {
        let n = self.count as f64;
        let mut min_error = n + 1.0;

        for target in self.targets.iter() {
            let error = if rank <= target.quantile * n {
                target.u * (n - rank)
            } else {
                target.v * rank
            };
            // NaN slopes (error 0 at quantile 0 or 1) never win
            if error < min_error {
                min_error = error;
            }
        }

        min_error * INVARIANT_HEADROOM
    }

    fn insert_batch(&mut self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.sort_unstable_by(|a, b| a.total_cmp(b));

        let existing = std::mem::take(&mut self.samples);
        let mut merged = Vec::with_capacity(existing.len() + buffer.len());
        let mut existing = existing.into_iter().peekable();
        let mut rank = 0u64;

        for &value in &buffer {
            while let Some(item) = existing.next_if(|item| item.value <= value) {
                rank += item.g;
                merged.push(item);
            }

            // Items landing at either end carry no rank uncertainty
            let delta = if merged.is_empty() || existing.peek().is_none() {
                0
            } else {
                (self.allowable_error(rank as f64).floor() - 1.0).max(0.0) as u64
            };

            merged.push(Item { value, g: 1, delta });
            rank += 1;
            self.count += 1;
        }

        merged.extend(existing);
        self.samples = merged;

        buffer.clear();
        self.buffer = buffer;
        true
    }

    fn compress(&mut self) {
        if self.samples.len() < 2 {
            return;
        }

        let samples = std::mem::take(&mut self.samples);
        let mut kept = Vec::with_capacity(samples.len());
        let mut rev = samples.into_iter().rev();

        let mut next = match rev.next() {
            Some(item) => item,
            None => return,
        };
        // Rank mass strictly before the item under consideration
        let mut rank = self.count - next.g;

        for prev in rev {
            rank -= prev.g;
            if (prev.g + next.g + next.delta) as f64 <= self.allowable_error(rank as f64) {
                next.g += prev.g;
            } else {
                kept.push(next);
                next = prev;
            }
        }

        kept.push(next);
        kept.reverse();
        self.samples = kept;
    }
}
