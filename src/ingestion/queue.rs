//! Bounded drop-oldest record queue
//!
//! Producers never block: when the queue is full the oldest pending request
//! is discarded to make room. A `Notify` wakes the single consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;
use tracing::warn;

use super::request::RecordRequest;
use crate::metrics;

/// Minimum interval between overflow warnings
const OVERFLOW_WARNING_COOLDOWN: Duration = Duration::from_secs(10);

/// Lock-free bounded queue between recorders and the ingestion worker
pub struct RecordQueue {
    queue: ArrayQueue<RecordRequest>,
    notify: Notify,
    dropped: AtomicU64,
    origin: Instant,
    /// Nanoseconds since `origin` of the last overflow warning, 0 if never
    last_warning_nanos: AtomicU64,
}

impl RecordQueue {
    /// Create a queue holding at most `capacity` requests
    ///
    /// `capacity` must be non-zero; [`Config::validate`](crate::config::Config::validate)
    /// rejects zero before a queue is ever built.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            origin: Instant::now(),
            last_warning_nanos: AtomicU64::new(0),
        }
    }

    /// Enqueue a request, evicting the oldest one when full
    pub fn push(&self, request: RecordRequest) {
        if let Some(evicted) = self.queue.force_push(request) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::record_dropped("queue_overflow");
            self.warn_overflow(dropped, evicted.kind());
        }
        metrics::update_queue_depth(self.queue.len());
        self.notify.notify_one();
    }

    /// Dequeue the oldest pending request
    pub fn pop(&self) -> Option<RecordRequest> {
        let request = self.queue.pop();
        if request.is_some() {
            metrics::update_queue_depth(self.queue.len());
        }
        request
    }

    /// Wait until a producer signals new work
    ///
    /// A signal sent while nobody was waiting is kept, so a push racing with
    /// the consumer going idle is never missed.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Pending requests
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum pending requests
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Requests discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn warn_overflow(&self, dropped: u64, kind: &'static str) {
        let cooldown_nanos = OVERFLOW_WARNING_COOLDOWN.as_nanos() as u64;
        // Offset by one so the first warning is distinguishable from "never"
        let now_nanos = self.origin.elapsed().as_nanos() as u64 + 1;

        let last_warning = self.last_warning_nanos.load(Ordering::Relaxed);
        if last_warning == 0 || now_nanos.saturating_sub(last_warning) >= cooldown_nanos {
            // Only one thread wins the slot
            if self
                .last_warning_nanos
                .compare_exchange(last_warning, now_nanos, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                warn!(
                    capacity = self.capacity(),
                    dropped,
                    evicted = kind,
                    "Record queue full, discarding oldest request"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::CountSeries;
    use crate::types::{CountOp, LabelKey};
    use std::sync::Arc;

    fn count(v: f64) -> RecordRequest {
        RecordRequest::Count {
            series: Arc::new(CountSeries {
                index: "requests".to_string(),
                key: LabelKey::empty(),
            }),
            op: CountOp::Increase(v),
        }
    }

    fn value(request: RecordRequest) -> f64 {
        match request {
            RecordRequest::Count {
                op: CountOp::Increase(v),
                ..
            } => v,
            _ => panic!("unexpected request"),
        }
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = RecordQueue::new(3);
        for v in 1..=5 {
            queue.push(count(v as f64));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);

        let drained: Vec<f64> = std::iter::from_fn(|| queue.pop()).map(value).collect();
        assert_eq!(drained, vec![3.0, 4.0, 5.0]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_missed() {
        let queue = RecordQueue::new(4);
        queue.push(count(1.0));

        tokio::time::timeout(Duration::from_secs(1), queue.notified())
            .await
            .expect("stored permit should complete the wait");
        assert_eq!(queue.len(), 1);
    }
}
