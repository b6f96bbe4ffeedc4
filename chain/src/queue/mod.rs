//! Durable FIFO queue (C4): an `incoming`/`processing` pair per node role
//! with deadline-based expiry and crash recovery (§4.3).

pub mod mem;

pub use mem::InMemoryQueue;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Item identity for deadline bookkeeping: `sha256(item)` per §4.3.
pub fn deadline_key(item_bytes: &[u8]) -> String {
    hex::encode(crate::crypto::hash_bytes(crate::crypto::SupportedHash::Sha256, item_bytes))
}

pub fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

/// One queued item plus its optional expiry.
///
/// `deadline` is an absolute unix timestamp; `None` means "never expires"
/// (always the case for L1 and L5, per §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueItem<T> {
    pub payload: T,
    pub deadline: Option<u64>,
}

impl<T> QueueItem<T> {
    pub fn is_expired(&self, now: u64) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

/// The queue contract every level executor dequeues through (§4.3).
///
/// A blanket trait over the item type `T` so L1's transaction queue and
/// L2..L5's block/bundle queues share one implementation and one crash-
/// recovery story.
#[async_trait::async_trait]
pub trait Queue<T: Clone + Send + Sync>: Send + Sync {
    /// Pushes `item` to the head of `incoming`. Callers pass `None` for
    /// `deadline` at L1/L5 (never expires); L2..L4 pass `Some(now + ttl)`.
    async fn enqueue(&self, item: T, deadline: Option<u64>);

    /// L1-only: atomically moves up to `min(len, 10_000)` items from
    /// `incoming` to `processing`, dropping any already past deadline.
    async fn get_new_transactions(&self) -> Vec<T>;

    /// L2..L5: atomically moves one non-expired item from `incoming` to
    /// `processing`, silently discarding expired items as it scans.
    async fn get_next_block(&self) -> Option<T>;

    /// Moves every item in `processing` back to `incoming`. Idempotent;
    /// called at the top of every tick when `processing` is non-empty, and
    /// unconditionally on executor startup (§4.7 step 2).
    async fn recover(&self);

    /// Marks the current tick's dequeued work durable. Only called after
    /// every side effect of the tick (storage, receipts, broadcast
    /// enqueue) has completed (§4.7 step 10).
    async fn clear_processing(&self);

    /// Whether `processing` currently holds anything — the signal for
    /// whether `recover()` has work to do (§4.7 step 2).
    async fn has_processing(&self) -> bool;
}
