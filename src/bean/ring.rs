//! Fixed-capacity ring of recent values

use std::collections::VecDeque;

/// Fixed-capacity FIFO of recent values
///
/// Pushing into a full ring evicts the oldest value. A ring of capacity zero
/// stays empty.
#[derive(Debug, Clone)]
pub struct BoundedRing {
    values: VecDeque<f64>,
    capacity: usize,
}

impl BoundedRing {
    /// Create an empty ring holding at most `capacity` values
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::new(),
            capacity,
        }
    }

    /// Append a value, evicting the oldest when full
    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Arithmetic mean, or 0 when empty
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance, or 0 when empty
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.values.len() as f64
    }

    /// Drop every value
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Values held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the ring holds no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum values held
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
