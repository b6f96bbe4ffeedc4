//! Object storage interface (C10): a typed wrapper over the key layout in
//! §6, with in-memory and filesystem-backed implementations.
//!
//! Concrete production object-storage backends (S3-compatible, etc.) are
//! out of scope (§1); this crate only needs the read/write/list/delete
//! surface the pipeline calls through.

pub mod fs;
pub mod mem;

pub use fs::FsObjectStore;
pub use mem::InMemoryObjectStore;

/// Raw key/value object storage, keyed by the string layout §6 defines
/// (`BLOCK/{blockId}`, `BROADCAST/TO_BROADCAST/{blockId}/{uuid}`, etc.).
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Lists keys with `prefix`, for range reads like `BLOCK/{id}-l{level}-*`
    /// (receipt collection, §4.9) and `TO_BROADCAST/{id}/*` (L5 batching, §4.7).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
    /// Deletes every key under `prefix`, for `TO_BROADCAST/{blockId}/` cleanup
    /// after an L5 anchor batch is assembled (§4.7 step 3d).
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend I/O error: {0}")]
    Io(String),
    #[error("stored value at {0} is not valid JSON for the requested type")]
    Corrupt(String),
}

/// JSON convenience helpers layered over the raw byte interface; every
/// caller in this crate stores JSON-serialised records.
pub mod json {
    use serde::{Serialize, de::DeserializeOwned};

    use super::{ObjectStore, StorageError};

    pub async fn get_json<T: DeserializeOwned>(
        store: &dyn ObjectStore,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match store.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|_| StorageError::Corrupt(key.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize + Sync>(
        store: &dyn ObjectStore,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Corrupt(format!("{key}: {e}")))?;
        store.put(key, bytes).await
    }
}

/// Key-builders for the layout in §6, kept in one place so every caller
/// agrees on the exact format.
pub mod keys {
    pub fn block(block_id: &str) -> String {
        format!("BLOCK/{block_id}")
    }

    pub const LAST_BLOCK_PROOF: &str = "BLOCK/LAST_BLOCK_PROOF";

    pub fn receipt(l1_block_id: &str, level: u8, sender_dc_id: &str) -> String {
        format!("BLOCK/{l1_block_id}-l{level}-{sender_dc_id}")
    }

    pub fn receipt_prefix(l1_block_id: &str, level: u8) -> String {
        format!("BLOCK/{l1_block_id}-l{level}-")
    }

    pub fn transactions(block_id: &str) -> String {
        format!("TRANSACTION/{block_id}")
    }

    pub fn payloads(block_id: &str) -> String {
        format!("PAYLOADS/{block_id}")
    }

    /// Per-block `txn_id -> active custom index names`, resolved once a
    /// transaction's declared type has taken effect (§4.7 L1 tick).
    pub fn custom_indexes(block_id: &str) -> String {
        format!("INDEX/{block_id}")
    }

    /// Projected fields for the block's secondary-index entry, written by
    /// every level's tick once the block is persisted.
    pub fn search_index(block_id: &str) -> String {
        format!("SEARCH_INDEX/{block_id}")
    }

    pub fn to_broadcast(block_id: &str, batch_id: &str) -> String {
        format!("BROADCAST/TO_BROADCAST/{block_id}/{batch_id}")
    }

    pub fn to_broadcast_prefix(block_id: &str) -> String {
        format!("BROADCAST/TO_BROADCAST/{block_id}/")
    }

    pub const BROADCAST_LAST_BLOCK: &str = "BROADCAST/LAST_BLOCK";
    pub const BROADCAST_LAST_CONFIRMED_BLOCK: &str = "BROADCAST/LAST_CONFIRMED_BLOCK";
    pub const BROADCAST_LAST_BROADCAST_TIME: &str = "BROADCAST/LAST_BROADCAST_TIME";
    pub const BROADCAST_LAST_WATCH_TIME: &str = "BROADCAST/LAST_WATCH_TIME";
    pub const BROADCAST_CURRENT_FUNDS: &str = "BROADCAST/CURRENT_FUNDS";

    /// The originating L1 chain/block a not-yet-confirmed L5 anchor was
    /// built from, so `check_confirmations` knows which L1 to send the
    /// finalising receipt to once the public-chain transaction lands.
    pub fn l5_pending_origin(block_id: &str) -> String {
        format!("BROADCAST/PENDING_ANCHOR/{block_id}")
    }

    /// Claim-check ids whose `resolve_claim_check` call failed with a
    /// retryable error, replayed by `process_claims_backlog` (§4.7 L5 step 5).
    pub const BROADCAST_FAILED_CLAIMS: &str = "BROADCAST/FAILED_CLAIMS";

    /// One L1 block the broadcast processor is still walking through
    /// levels 2-4 (§4.8). Removed once it has been promoted past L4.
    pub fn pending(block_id: &str) -> String {
        format!("BROADCAST/PENDING/{block_id}")
    }

    pub const PENDING_PREFIX: &str = "BROADCAST/PENDING/";

    /// Marks that `block_id`'s claim has already been promoted past
    /// `level`, so a slow-to-fill claim isn't re-broadcast every tick.
    pub fn promoted(block_id: &str, level: u8) -> String {
        format!("BROADCAST/PROMOTED/{block_id}/{level}")
    }

    /// Unix timestamp of when `block_id` was first assigned to verifiers at
    /// `level`, used to detect non-responders (§4.8 step 3).
    pub fn assigned_at(block_id: &str, level: u8) -> String {
        format!("BROADCAST/ASSIGNED_AT/{block_id}/{level}")
    }

    /// Parses the verifier level out of a receipt key, `BLOCK/.*-l([2-5])-`
    /// (§4.8, receipt dispatch).
    pub fn parse_receipt_level(key: &str) -> Option<u8> {
        let marker = key.rfind("-l")?;
        let rest = &key[marker + 2..];
        let digit_end = rest.find('-')?;
        rest[..digit_end].parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::keys::*;

    #[test]
    fn receipt_key_round_trips_through_parse_receipt_level() {
        let key = receipt("100", 3, "chain-a");
        assert_eq!(key, "BLOCK/100-l3-chain-a");
        assert_eq!(parse_receipt_level(&key), Some(3));
    }

    #[test]
    fn parse_receipt_level_rejects_unrelated_keys() {
        assert_eq!(parse_receipt_level("BLOCK/100"), None);
    }
}
