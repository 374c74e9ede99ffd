//! Read-and-clear count accumulator

use std::sync::atomic::{AtomicU64, Ordering};

use crate::atomic::AtomicF64;
use crate::types::{CountOp, LabelKey};

/// Additive accumulator for one count series
///
/// Every cycle reads the accumulator with [`take`](CountBean::take), which
/// swaps in zero, so the pushed value is the change since the last cycle.
#[derive(Debug)]
pub struct CountBean {
    key: LabelKey,
    value: AtomicF64,
    last_update: AtomicU64,
}

impl CountBean {
    /// Create a zeroed bean
    pub fn new(key: LabelKey, now: u64) -> Self {
        Self {
            key,
            value: AtomicF64::default(),
            last_update: AtomicU64::new(now),
        }
    }

    /// Label set of this series
    pub fn key(&self) -> &LabelKey {
        &self.key
    }

    /// Apply a mutation and stamp the update time
    pub fn apply(&self, op: CountOp, now: u64) {
        match op {
            CountOp::Increase(v) => {
                self.value.add(v);
            },
            CountOp::Reduce(v) => {
                self.value.add(-v);
            },
            CountOp::Reset(v) => self.value.set(v),
        }
        self.last_update.store(now, Ordering::Release);
    }

    /// Add `v`
    pub fn increase(&self, v: f64, now: u64) {
        self.apply(CountOp::Increase(v), now);
    }

    /// Subtract `v`
    pub fn reduce(&self, v: f64, now: u64) {
        self.apply(CountOp::Reduce(v), now);
    }

    /// Overwrite with `v`
    pub fn reset(&self, v: f64, now: u64) {
        self.apply(CountOp::Reset(v), now);
    }

    /// Read the accumulator and zero it in one step
    pub fn take(&self) -> f64 {
        self.value.swap(0.0)
    }

    /// Read the accumulator without clearing it
    pub fn peek(&self) -> f64 {
        self.value.get()
    }

    /// Unix milliseconds of the last mutation
    pub fn last_update(&self) -> u64 {
        self.last_update.load(Ordering::Acquire)
    }

    /// Whether the bean has gone unused for longer than `expiration_ms`
    pub fn is_expired(&self, now: u64, expiration_ms: u64) -> bool {
        super::is_expired(self.last_update(), now, expiration_ms)
    }
}
