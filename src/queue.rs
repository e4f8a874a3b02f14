use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::trade::Trade;

/// Single-producer/single-consumer FIFO hand-off between the connection manager and
/// the reader task, with a sticky terminal close.
///
/// `push` and `stop` never block. `pop` suspends until a trade is available or the
/// queue has been stopped and drained, at which point it returns `None`.
#[derive(Default)]
pub struct HandoffQueue {
    items: Mutex<VecDeque<Trade>>,
    stopped: AtomicBool,
    notify: Notify,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a trade. A no-op once [`stop`](Self::stop) has been called.
    pub fn push(&self, trade: Trade) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.items.lock().push_back(trade);
        self.notify.notify_one();
    }

    /// Block until a trade is available, or the queue is stopped and empty.
    ///
    /// Once stopped and drained, every subsequent call returns `None` immediately.
    pub async fn pop(&self) -> Option<Trade> {
        loop {
            // Register interest before re-checking state so a `stop()`/`push()` that
            // races in between is never missed.
            let notified = self.notify.notified();

            if let Some(trade) = self.items.lock().pop_front() {
                return Some(trade);
            }
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    /// Idempotent. Wakes every blocked `pop`. Items already enqueued remain drainable.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn sample_trade(ts: u64) -> Trade {
        Trade {
            symbol: "btcusdt".into(),
            price: 1.0,
            quantity: 1.0,
            event_timestamp_ms: ts,
            buyer_initiated: false,
        }
    }

    #[tokio::test]
    async fn pop_returns_pushed_items_in_order() {
        let q = HandoffQueue::new();
        q.push(sample_trade(1));
        q.push(sample_trade(2));

        assert_eq!(q.pop().await.unwrap().event_timestamp_ms, 1);
        assert_eq!(q.pop().await.unwrap().event_timestamp_ms, 2);
    }

    #[tokio::test]
    async fn push_after_stop_is_a_no_op() {
        let q = HandoffQueue::new();
        q.stop();
        q.push(sample_trade(1));
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn pop_drains_before_reporting_stopped() {
        let q = HandoffQueue::new();
        q.push(sample_trade(1));
        q.stop();

        assert_eq!(q.pop().await.unwrap().event_timestamp_ms, 1);
        assert_eq!(q.pop().await, None);
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn blocked_pop_observes_stop_promptly() {
        let q = Arc::new(HandoffQueue::new());
        let q2 = q.clone();

        let waiter = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.stop();

        let result = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("pop did not wake up after stop")
            .unwrap();
        assert_eq!(result, None);
    }
}
