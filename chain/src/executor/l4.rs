//! L4 tick (§4.7): re-validates a bundle of L3 proofs and records a
//! pass/fail flag for each, rather than dropping the unverifiable ones.

use std::sync::Arc;

use crate::broadcast::dto::L4BroadcastItem;
use crate::crypto::{SupportedEncryption, SupportedHash};
use crate::keys::{KeyError, LocalKeypair, PeerKeyResolver};
use crate::matchmaking::MatchmakingClient;
use crate::queue::Queue;
use crate::storage::{ObjectStore, json, keys};
use crate::types::block::{BlockHeader, L2ProofRow, L4Block, L4ValidationRow, Proof};
use crate::types::{AtRest, ProofScheme, SearchIndexEntry};

use super::{ExecutorError, LastBlockPointer, ReceiptSender, RegistrationRenewer, TickOutcome, build_registration};

pub struct L4Executor {
    pub keypair: Arc<LocalKeypair>,
    pub own_url: String,
    pub queue: Arc<dyn Queue<L4BroadcastItem>>,
    pub storage: Arc<dyn ObjectStore>,
    pub matchmaking: Arc<dyn MatchmakingClient>,
    pub resolver: Arc<PeerKeyResolver>,
    pub receipts: Arc<ReceiptSender>,
    pub hash: SupportedHash,
    pub proof_scheme: ProofScheme,
    pub complexity: u8,
    pub renewer: RegistrationRenewer,
}

impl L4Executor {
    pub async fn tick(&self) -> Result<TickOutcome, ExecutorError> {
        if self.renewer.due() {
            let registration = build_registration(
                self.keypair.dc_id(),
                4,
                &self.own_url,
                SupportedEncryption::Secp256k1,
                self.hash,
                &self.keypair.verifying_key(),
                None,
                None,
                None,
                None,
            );
            self.matchmaking.register(&registration).await?;
            self.renewer.mark_renewed();
        }

        if self.queue.has_processing().await {
            self.queue.recover().await;
        }

        let bundle = match self.queue.get_next_block().await {
            Some(bundle) => bundle,
            None => return Ok(TickOutcome::Idle),
        };

        let mut validations = Vec::with_capacity(bundle.l3_rows.len());
        for row in &bundle.l3_rows {
            let valid = match self.verify_l3_row(row).await {
                Ok(()) => true,
                Err(KeyError::NotFound(dc_id)) => {
                    tracing::warn!(l3_dc_id = %dc_id, "L3 row sender not registered, marking invalid");
                    false
                }
                Err(_) => false,
            };
            validations.push(L4ValidationRow {
                l3_dc_id: row.dc_id.clone(),
                l3_block_id: row.block_id,
                l3_proof: row.proof.clone(),
                valid,
            });
        }

        if validations.is_empty() {
            self.queue.clear_processing().await;
            return Ok(TickOutcome::Idle);
        }

        let last = json::get_json::<LastBlockPointer>(self.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await?
            .unwrap_or_default();
        let next_block_id: u64 = last.id.parse().map(|n: u64| n + 1).unwrap_or(1);

        let mut block = L4Block {
            header: BlockHeader {
                dc_id: self.keypair.dc_id().to_string(),
                block_id: next_block_id,
                timestamp: crate::queue::now_unix_secs().to_string(),
                prev_proof: last.proof,
            },
            l1_dc_id: bundle.l1_dc_id.clone(),
            l1_block_id: bundle.l1_block_id,
            l1_proof: bundle.l1_proof.clone(),
            validations,
            proof: Proof::Trust { signature: String::new() },
        };
        block.apply_proof(self.proof_scheme, self.hash, self.keypair.signing_key(), self.complexity)?;

        let block_id_str = next_block_id.to_string();
        json::put_json(self.storage.as_ref(), &keys::block(&block_id_str), &block.export_as_at_rest()).await?;
        json::put_json(self.storage.as_ref(), &keys::search_index(&block_id_str), &block.export_as_search_index())
            .await?;
        json::put_json(
            self.storage.as_ref(),
            keys::LAST_BLOCK_PROOF,
            &LastBlockPointer { id: block_id_str.clone(), proof: block.proof.as_proof_string().to_string() },
        )
        .await?;

        self.receipts
            .send(4, &bundle.l1_dc_id, bundle.l1_block_id, next_block_id, block.proof.as_proof_string())
            .await?;

        self.queue.clear_processing().await;
        Ok(TickOutcome::Produced { block_id: block_id_str })
    }

    /// Mirrors L3's lightweight attestation check (§4.7): the stored row
    /// only carries `{dc_id, block_id, proof}`, not the full L3 canonical bytes.
    async fn verify_l3_row(&self, row: &L2ProofRow) -> Result<(), KeyError> {
        let message = format!("{}:{}", row.dc_id, row.block_id);
        let proof = Proof::Trust { signature: row.proof.clone() };
        self.resolver.verify_block_proof(&row.dc_id, message.as_bytes(), &proof, self.complexity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemorySharedKeyStore;
    use crate::keys::InMemorySecretStore;
    use crate::matchmaking::fake::InMemoryMatchmakingClient;
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryObjectStore;

    async fn make_executor() -> (L4Executor, Arc<InMemoryMatchmakingClient>) {
        let keypair = Arc::new(LocalKeypair::load_or_generate(&InMemorySecretStore::default()).unwrap());
        let mm = Arc::new(InMemoryMatchmakingClient::default());
        let resolver = Arc::new(PeerKeyResolver::new(mm.clone()));
        let receipts = Arc::new(ReceiptSender::new(
            keypair.dc_id().to_string(),
            keypair.signing_key().clone(),
            SupportedHash::Sha256,
            resolver.clone(),
            Arc::new(InMemorySharedKeyStore::default()),
        ));
        let executor = L4Executor {
            keypair,
            own_url: "https://l4.example".into(),
            queue: Arc::new(InMemoryQueue::default()),
            storage: Arc::new(InMemoryObjectStore::default()),
            matchmaking: mm.clone(),
            resolver,
            receipts,
            hash: SupportedHash::Sha256,
            proof_scheme: ProofScheme::Trust,
            complexity: 0,
            renewer: RegistrationRenewer::new(std::time::Duration::from_secs(1)),
        };
        (executor, mm)
    }

    #[tokio::test]
    async fn empty_queue_yields_idle() {
        let (executor, _mm) = make_executor().await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn an_unresolvable_l3_row_is_recorded_invalid_not_dropped() {
        let (executor, _mm) = make_executor().await;
        executor
            .queue
            .enqueue(
                L4BroadcastItem {
                    l1_dc_id: "l1-chain".into(),
                    l1_block_id: 1,
                    l1_proof: "sig".into(),
                    l3_rows: vec![L2ProofRow { dc_id: "ghost".into(), block_id: 1, proof: "sig".into() }],
                },
                None,
            )
            .await;
        let outcome = executor.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Produced { .. }));
    }
}
