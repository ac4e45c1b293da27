//! In-process order queue.

use crate::storage::{Order, OrderKey};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

/// Bounded queue of orders awaiting a fill worker.
///
/// The dispatcher re-queries pending orders every second, so the queue
/// deduplicates: an order queued within the requeue delay is dropped, which
/// keeps an order from being handed to a second worker while the first one
/// is still on it.
#[derive(Debug)]
pub struct OrderQueue {
    tx: mpsc::Sender<Order>,
    recently_queued: Mutex<HashMap<OrderKey, Instant>>,
    requeue_delay: Duration,
}

impl OrderQueue {
    /// Creates a queue and its consumer end.
    pub fn new(requeue_delay: Duration, capacity: usize) -> (Self, mpsc::Receiver<Order>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, recently_queued: Mutex::new(HashMap::new()), requeue_delay }, rx)
    }

    /// Attempts to queue an order. Returns false if the order was queued
    /// within the requeue delay or the queue is full.
    pub fn queue(&self, order: Order) -> bool {
        let key = order.key();
        {
            let mut recent = self.recently_queued.lock().expect("not poisoned");
            recent.retain(|_, queued_at| queued_at.elapsed() < self.requeue_delay);
            if recent.contains_key(&key) {
                return false;
            }
            if self.tx.capacity() == 0 {
                return false;
            }
            recent.insert(key, Instant::now());
        }

        self.tx.try_send(order).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order(order_id: &str) -> Order {
        Order {
            id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            source_chain_id: "42161".into(),
            destination_chain_id: "osmosis-1".into(),
            source_chain_gateway_address: "0xaa".into(),
            sender: vec![0; 32],
            recipient: vec![0; 32],
            amount_in: "5000000".into(),
            amount_out: "4995000".into(),
            nonce: 1,
            order_id: order_id.into(),
            order_status: crate::types::OrderStatus::Pending,
            order_status_message: None,
            fill_tx: None,
            filler: None,
            refund_tx: None,
            order_creation_tx: "0xbb".into(),
            order_creation_tx_block_height: 10,
            timeout_timestamp: Utc::now(),
            data: None,
        }
    }

    #[tokio::test]
    async fn dedupes_within_requeue_delay() {
        let (queue, mut rx) = OrderQueue::new(Duration::from_secs(30), 10);
        assert!(queue.queue(order("aa")));
        assert!(!queue.queue(order("aa")));
        assert!(queue.queue(order("bb")));

        assert_eq!(rx.recv().await.unwrap().order_id, "aa");
        assert_eq!(rx.recv().await.unwrap().order_id, "bb");
        // Still deduped after the pop; the window is time-based.
        assert!(!queue.queue(order("aa")));
    }

    #[tokio::test]
    async fn requeues_after_delay_expires() {
        let (queue, mut rx) = OrderQueue::new(Duration::from_millis(10), 10);
        assert!(queue.queue(order("aa")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.queue(order("aa")));

        assert_eq!(rx.recv().await.unwrap().order_id, "aa");
        assert_eq!(rx.recv().await.unwrap().order_id, "aa");
    }

    #[tokio::test]
    async fn drops_when_full() {
        let (queue, _rx) = OrderQueue::new(Duration::from_secs(30), 2);
        assert!(queue.queue(order("aa")));
        assert!(queue.queue(order("bb")));
        assert!(!queue.queue(order("cc")));
    }
}
