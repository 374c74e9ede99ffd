//! Per-series aggregate state
//!
//! A bean holds everything one label set accumulates between aggregation
//! cycles. Beans are created by the registries on first record and dropped
//! once they have gone unused for longer than the expiration window.
//!
//! - **`CountBean`**: one additive accumulator, read-and-cleared each cycle
//! - **`DelayBean`**: max, min, average and variance of recent durations plus
//!   a handle to the series' cumulative summary child

mod count;
mod delay;
mod ring;

pub use count::CountBean;
pub use delay::{DelayBean, DelaySnapshot};
pub use ring::BoundedRing;

/// Whether a bean last touched at `last_update` has outlived `expiration_ms`
#[inline]
pub(crate) fn is_expired(last_update: u64, now: u64, expiration_ms: u64) -> bool {
    now.saturating_sub(last_update) > expiration_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_strict() {
        assert!(!is_expired(1_000, 11_000, 10_000));
        assert!(is_expired(1_000, 11_001, 10_000));
        // Clock stepping backwards never expires a bean
        assert!(!is_expired(5_000, 1_000, 10));
    }
}
