//! In-memory queue implementation. Durability beyond process lifetime is
//! out of scope (§1 excludes concrete storage backends); this gives every
//! executor a working queue with the exact atomicity and recovery
//! semantics §4.3 specifies.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Queue, QueueItem, now_unix_secs};

const L1_BATCH_CAP: usize = 10_000;

pub struct InMemoryQueue<T> {
    incoming: Mutex<VecDeque<QueueItem<T>>>,
    processing: Mutex<VecDeque<QueueItem<T>>>,
}

impl<T> Default for InMemoryQueue<T> {
    fn default() -> Self {
        Self { incoming: Mutex::new(VecDeque::new()), processing: Mutex::new(VecDeque::new()) }
    }
}

#[async_trait::async_trait]
impl<T: Clone + Send + Sync> Queue<T> for InMemoryQueue<T> {
    async fn enqueue(&self, item: T, deadline: Option<u64>) {
        self.incoming.lock().expect("lock poisoned").push_front(QueueItem { payload: item, deadline });
    }

    async fn get_new_transactions(&self) -> Vec<T> {
        let now = now_unix_secs();
        let mut incoming = self.incoming.lock().expect("lock poisoned");
        let mut processing = self.processing.lock().expect("lock poisoned");

        let take = incoming.len().min(L1_BATCH_CAP);
        let mut items = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(item) = incoming.pop_back() {
                if item.is_expired(now) {
                    continue;
                }
                items.push(item.payload.clone());
                processing.push_back(item);
            }
        }
        items
    }

    async fn get_next_block(&self) -> Option<T> {
        let now = now_unix_secs();
        let mut incoming = self.incoming.lock().expect("lock poisoned");
        let mut processing = self.processing.lock().expect("lock poisoned");

        while let Some(item) = incoming.pop_back() {
            if item.is_expired(now) {
                continue;
            }
            let payload = item.payload.clone();
            processing.push_back(item);
            return Some(payload);
        }
        None
    }

    async fn recover(&self) {
        let mut incoming = self.incoming.lock().expect("lock poisoned");
        let mut processing = self.processing.lock().expect("lock poisoned");
        while let Some(item) = processing.pop_front() {
            incoming.push_back(item);
        }
    }

    async fn clear_processing(&self) {
        self.processing.lock().expect("lock poisoned").clear();
    }

    async fn has_processing(&self) -> bool {
        !self.processing.lock().expect("lock poisoned").is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_get_next_block_moves_item_to_processing() {
        let queue: InMemoryQueue<String> = InMemoryQueue::default();
        queue.enqueue("block-a".to_string(), None).await;
        assert!(!queue.has_processing().await);

        let item = queue.get_next_block().await.unwrap();
        assert_eq!(item, "block-a");
        assert!(queue.has_processing().await);
    }

    #[tokio::test]
    async fn recover_moves_processing_back_to_incoming() {
        let queue: InMemoryQueue<String> = InMemoryQueue::default();
        queue.enqueue("block-a".to_string(), None).await;
        queue.get_next_block().await.unwrap();
        assert!(queue.has_processing().await);

        queue.recover().await;
        assert!(!queue.has_processing().await);
        let replayed = queue.get_next_block().await.unwrap();
        assert_eq!(replayed, "block-a");
    }

    #[tokio::test]
    async fn clear_processing_finalizes_after_recovery_would_no_longer_replay() {
        let queue: InMemoryQueue<String> = InMemoryQueue::default();
        queue.enqueue("block-a".to_string(), None).await;
        queue.get_next_block().await.unwrap();
        queue.clear_processing().await;

        queue.recover().await;
        assert!(queue.get_next_block().await.is_none());
    }

    #[tokio::test]
    async fn expired_item_is_silently_dropped_on_dequeue() {
        let queue: InMemoryQueue<String> = InMemoryQueue::default();
        queue.enqueue("stale".to_string(), Some(0)).await;
        assert!(queue.get_next_block().await.is_none());
    }

    #[tokio::test]
    async fn get_new_transactions_caps_at_batch_size() {
        let queue: InMemoryQueue<u32> = InMemoryQueue::default();
        for i in 0..5 {
            queue.enqueue(i, None).await;
        }
        let batch = queue.get_new_transactions().await;
        assert_eq!(batch.len(), 5);
        assert!(queue.get_new_transactions().await.is_empty());
    }
}
