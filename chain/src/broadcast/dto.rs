//! Broadcast DTOs exchanged between levels (§4.9).
//!
//! L1's block is broadcast to L2 directly; everything above L2 instead
//! receives the *verified receipts* the originating L1 chain collected for
//! the level below, because the claim a block travels under always tracks
//! back to that one L1 `block_id` (§3) rather than to a chain of
//! level-local block ids.

use serde::{Deserialize, Serialize};

pub use crate::types::block::{L1AtRestDto as L1BroadcastItem, L2ProofRow};

/// Enqueued for L3 once `num_l2` L2 receipts have accumulated for one L1 block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L3BroadcastItem {
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    pub l2_rows: Vec<L2ProofRow>,
}

/// Enqueued for L4 once `num_l3` L3 receipts have accumulated for one L1 block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L4BroadcastItem {
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    pub l3_rows: Vec<L2ProofRow>,
}

/// Enqueued for L5 once `num_l4` L4 receipts have accumulated for one L1 block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L5BroadcastItem {
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l4_rows: Vec<L2ProofRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum DtoError {
    #[error("only {have} of {need} verifications are stored for level {level} of block {block_id}")]
    NotEnoughVerifications { block_id: String, level: u8, have: usize, need: u32 },
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

/// Gathers every stored receipt row at `level` for `block_id`. Fails with
/// [`DtoError::NotEnoughVerifications`] if fewer than `required` rows are
/// present — the broadcast loop should not have called this yet.
pub async fn collect_receipt_rows(
    storage: &dyn crate::storage::ObjectStore,
    block_id: &str,
    level: u8,
    required: u32,
) -> Result<Vec<L2ProofRow>, DtoError> {
    let keys = storage.list(&crate::storage::keys::receipt_prefix(block_id, level)).await?;
    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(row) = crate::storage::json::get_json::<L2ProofRow>(storage, &key).await? {
            rows.push(row);
        }
    }
    if (rows.len() as u32) < required {
        return Err(DtoError::NotEnoughVerifications {
            block_id: block_id.to_string(),
            level,
            have: rows.len(),
            need: required,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;

    #[tokio::test]
    async fn collecting_before_enough_receipts_have_arrived_fails() {
        let storage = InMemoryObjectStore::default();
        crate::storage::json::put_json(
            &storage,
            &crate::storage::keys::receipt("block-1", 2, "chain-a"),
            &L2ProofRow { dc_id: "chain-a".into(), block_id: 9, proof: "sig".into() },
        )
        .await
        .unwrap();

        let result = collect_receipt_rows(&storage, "block-1", 2, 2).await;
        assert!(matches!(result, Err(DtoError::NotEnoughVerifications { have: 1, need: 2, .. })));
    }

    #[tokio::test]
    async fn collecting_once_enough_receipts_are_present_succeeds() {
        let storage = InMemoryObjectStore::default();
        for (dc_id, block_id) in [("chain-a", 1u64), ("chain-b", 2)] {
            crate::storage::json::put_json(
                &storage,
                &crate::storage::keys::receipt("block-1", 2, dc_id),
                &L2ProofRow { dc_id: dc_id.into(), block_id, proof: "sig".into() },
            )
            .await
            .unwrap();
        }

        let rows = collect_receipt_rows(&storage, "block-1", 2, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
