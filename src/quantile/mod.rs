//! Streaming quantile estimation
//!
//! [`QuantileSketch`] is a bounded-memory targeted-quantile summary;
//! [`WindowedQuantileTracker`] ages observations out of a ring of sketches.

mod sketch;
mod window;

pub use sketch::{QuantileSketch, QuantileTarget, DEFAULT_BUFFER_CAPACITY};
pub use window::WindowedQuantileTracker;
