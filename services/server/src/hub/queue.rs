//! Per-subscriber delivery queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dockward_events::EventEnvelope;
use tokio::sync::Notify;

/// Bounded single-consumer queue that evicts its oldest entry when full.
///
/// `push` never waits, so a stalled consumer cannot hold up the producer.
pub(crate) struct SubscriberQueue {
    buffer: Mutex<VecDeque<Arc<EventEnvelope>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// Result of offering an event to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Queued,
    /// Queued after evicting the oldest buffered event.
    Evicted,
    Closed,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn push(&self, event: Arc<EventEnvelope>) -> Push {
        if self.is_closed() {
            return Push::Closed;
        }

        let outcome = {
            let mut buffer = self.lock();
            let outcome = if buffer.len() >= self.capacity {
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Push::Evicted
            } else {
                Push::Queued
            };
            buffer.push_back(event);
            outcome
        };

        self.notify.notify_one();
        outcome
    }

    /// Next event in arrival order. Buffered events are still handed out
    /// after `close`; `None` once closed and empty.
    pub(crate) async fn pop(&self) -> Option<Arc<EventEnvelope>> {
        loop {
            if let Some(event) = self.lock().pop_front() {
                return Some(event);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<EventEnvelope>>> {
        // A poisoned buffer still holds valid events.
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use serde_json::json;

    fn event(n: i64) -> Arc<EventEnvelope> {
        Arc::new(
            EventEnvelope::from_value(json!({
                "Type": "container",
                "Action": "start",
                "Actor": { "ID": format!("c{n}") },
                "time": 1_700_000_000 + n
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = SubscriberQueue::new(8);
        for n in 0..3 {
            assert_eq!(queue.push(event(n)), Push::Queued);
        }
        for n in 0..3 {
            assert_eq!(queue.pop().await.unwrap().actor_id, format!("c{n}"));
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let queue = SubscriberQueue::new(2);
        queue.push(event(1));
        queue.push(event(2));
        assert_eq!(queue.push(event(3)), Push::Evicted);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await.unwrap().actor_id, "c2");
        assert_eq!(queue.pop().await.unwrap().actor_id, "c3");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = SubscriberQueue::new(4);
        queue.push(event(1));
        queue.close();

        assert_eq!(queue.push(event(2)), Push::Closed);
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(SubscriberQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(event(7));

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().actor_id, "c7");
    }

    #[tokio::test]
    async fn test_pop_wakes_on_close() {
        let queue = Arc::new(SubscriberQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = SubscriberQueue::new(0);
        queue.push(event(1));
        assert_eq!(queue.push(event(2)), Push::Evicted);
        assert_eq!(queue.len(), 1);
    }
}
