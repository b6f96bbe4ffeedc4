//! Receipt handler (C9): records one verifier's response to a claim and
//! forwards a best-effort verification-notification webhook (§4.8).
//!
//! A receipt always targets the L1 chain that owns the claim, regardless
//! of which level produced it — level 2-5 blocks all verify work that
//! ultimately traces back to one L1 `block_id` (§3).

use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;

use crate::config::VerificationNotificationConfig;
use crate::matchmaking::{MatchmakingClient, MatchmakingError};
use crate::storage::{ObjectStore, StorageError, json, keys};
use crate::types::block::L2ProofRow;

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("claim for block {0} has no open slots at level {1}")]
    ClaimClosed(String, u8),
    #[error("chain {0} already has a recorded receipt for block {1} at level {2}")]
    DuplicateReceipt(String, String, u8),
    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One verifier's response, as received over `/v1/receipt` (§6).
#[derive(Clone, Debug)]
pub struct ReceiptRequest {
    pub l1_block_id: String,
    pub level: u8,
    pub sender_dc_id: String,
    pub sender_block_id: u64,
    pub signature: String,
}

pub struct ReceiptHandler {
    matchmaking: Arc<dyn MatchmakingClient>,
    storage: Arc<dyn ObjectStore>,
    http: Client,
    notification: Option<VerificationNotificationConfig>,
}

impl ReceiptHandler {
    pub fn new(
        matchmaking: Arc<dyn MatchmakingClient>,
        storage: Arc<dyn ObjectStore>,
        notification: Option<VerificationNotificationConfig>,
    ) -> Self {
        Self { matchmaking, storage, http: Client::new(), notification }
    }

    /// §4.8's receipt-handling algorithm: reject stale/duplicate receipts,
    /// persist the row, update the claim, and fire the notification hook.
    pub async fn handle(&self, request: ReceiptRequest) -> Result<(), ReceiptError> {
        let claim = self.matchmaking.get_claim_check(&request.l1_block_id).await?;

        if !claim.is_accepting_verifications(request.level) {
            return Err(ReceiptError::ClaimClosed(request.l1_block_id, request.level));
        }
        if claim.has_recorded(request.level, &request.sender_dc_id) {
            return Err(ReceiptError::DuplicateReceipt(
                request.sender_dc_id,
                request.l1_block_id,
                request.level,
            ));
        }

        json::put_json(
            self.storage.as_ref(),
            &keys::receipt(&request.l1_block_id, request.level, &request.sender_dc_id),
            &L2ProofRow {
                dc_id: request.sender_dc_id.clone(),
                block_id: request.sender_block_id,
                proof: request.signature.clone(),
            },
        )
        .await?;

        self.matchmaking
            .add_receipt(
                &request.l1_block_id,
                request.level,
                &request.sender_dc_id,
                &request.sender_block_id.to_string(),
                &request.signature,
            )
            .await?;

        self.notify(&request).await;
        Ok(())
    }

    /// Best-effort webhook; a failure here never fails the receipt itself.
    async fn notify(&self, request: &ReceiptRequest) {
        let Some(config) = &self.notification else { return };
        if let Some(only_level) = config.level {
            if only_level != request.level {
                return;
            }
        }

        #[derive(Serialize)]
        struct Payload<'a> {
            l1_block_id: &'a str,
            level: u8,
            dc_id: &'a str,
        }
        let payload =
            Payload { l1_block_id: &request.l1_block_id, level: request.level, dc_id: &request.sender_dc_id };
        if let Err(e) = self.http.post(&config.url).json(&payload).send().await {
            tracing::warn!(url = %config.url, error = %e, "verification notification delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::fake::InMemoryMatchmakingClient;
    use crate::storage::InMemoryObjectStore;
    use crate::types::LevelRequirement;

    fn handler() -> (ReceiptHandler, Arc<InMemoryMatchmakingClient>, Arc<InMemoryObjectStore>) {
        let mm = Arc::new(InMemoryMatchmakingClient::default());
        let storage = Arc::new(InMemoryObjectStore::default());
        let handler = ReceiptHandler::new(mm.clone(), storage.clone(), None);
        (handler, mm, storage)
    }

    #[tokio::test]
    async fn first_receipt_is_recorded_and_persisted() {
        let (handler, mm, storage) = handler();
        mm.create_claim_check("block-1", &[LevelRequirement { level: 2, count: 2 }]).await.unwrap();

        handler
            .handle(ReceiptRequest {
                l1_block_id: "block-1".into(),
                level: 2,
                sender_dc_id: "chain-a".into(),
                sender_block_id: 7,
                signature: "sig-a".into(),
            })
            .await
            .unwrap();

        let claim = mm.get_claim_check("block-1").await.unwrap();
        assert!(claim.has_recorded(2, "chain-a"));
        assert!(
            storage
                .get(&keys::receipt("block-1", 2, "chain-a"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn duplicate_receipt_from_the_same_chain_is_rejected() {
        let (handler, mm, _storage) = handler();
        mm.create_claim_check("block-1", &[LevelRequirement { level: 2, count: 2 }]).await.unwrap();
        let req = ReceiptRequest {
            l1_block_id: "block-1".into(),
            level: 2,
            sender_dc_id: "chain-a".into(),
            sender_block_id: 7,
            signature: "sig-a".into(),
        };
        handler.handle(req.clone()).await.unwrap();
        assert!(matches!(handler.handle(req).await, Err(ReceiptError::DuplicateReceipt(..))));
    }

    #[tokio::test]
    async fn receipt_after_claim_is_already_full_is_rejected() {
        let (handler, mm, _storage) = handler();
        mm.create_claim_check("block-1", &[LevelRequirement { level: 2, count: 1 }]).await.unwrap();
        handler
            .handle(ReceiptRequest {
                l1_block_id: "block-1".into(),
                level: 2,
                sender_dc_id: "chain-a".into(),
                sender_block_id: 7,
                signature: "sig-a".into(),
            })
            .await
            .unwrap();

        let result = handler
            .handle(ReceiptRequest {
                l1_block_id: "block-1".into(),
                level: 2,
                sender_dc_id: "chain-b".into(),
                sender_block_id: 8,
                signature: "sig-b".into(),
            })
            .await;
        assert!(matches!(result, Err(ReceiptError::ClaimClosed(..))));
    }
}
