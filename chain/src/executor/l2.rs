//! L2 tick (§4.7): verifies one L1 block's proof and each of its stripped
//! transactions, then reports the per-transaction verdicts upward.

use std::sync::Arc;

use crate::broadcast::dto::L1BroadcastItem;
use crate::crypto::{SupportedEncryption, SupportedHash};
use crate::keys::{KeyError, LocalKeypair, PeerKeyResolver};
use crate::matchmaking::MatchmakingClient;
use crate::queue::Queue;
use crate::storage::{ObjectStore, json, keys};
use crate::types::block::{BlockHeader, L1Block, L2Block, Proof};
use crate::types::{AtRest, ProofScheme, SearchIndexEntry, StrippedTransaction};

use super::{ExecutorError, LastBlockPointer, ReceiptSender, RegistrationRenewer, TickOutcome, build_registration};

pub struct L2Executor {
    pub keypair: Arc<LocalKeypair>,
    pub own_url: String,
    pub queue: Arc<dyn Queue<L1BroadcastItem>>,
    pub storage: Arc<dyn ObjectStore>,
    pub matchmaking: Arc<dyn MatchmakingClient>,
    pub resolver: Arc<PeerKeyResolver>,
    pub receipts: Arc<ReceiptSender>,
    pub hash: SupportedHash,
    pub proof_scheme: ProofScheme,
    pub complexity: u8,
    pub renewer: RegistrationRenewer,
}

impl L2Executor {
    pub async fn tick(&self) -> Result<TickOutcome, ExecutorError> {
        if self.renewer.due() {
            let registration = build_registration(
                self.keypair.dc_id(),
                2,
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

        let dto = match self.queue.get_next_block().await {
            Some(dto) => dto,
            None => return Ok(TickOutcome::Idle),
        };

        let l1_proof = match dto.scheme {
            ProofScheme::Trust => Proof::Trust { signature: dto.proof.clone() },
            ProofScheme::Work => Proof::Work { digest: dto.proof.clone(), nonce: dto.nonce.unwrap_or(0) },
        };
        let l1_block = L1Block {
            header: BlockHeader {
                dc_id: dto.dc_id.clone(),
                block_id: dto.block_id,
                timestamp: dto.timestamp.clone(),
                prev_proof: dto.prev_proof.clone(),
            },
            prev_id: dto.prev_id.clone(),
            stripped_transactions: dto.stripped_transactions.clone(),
            proof: l1_proof,
        };

        let l1_proof_valid = match self
            .resolver
            .verify_block_proof(&dto.dc_id, &l1_block.canonical_bytes(), &l1_block.proof, self.complexity)
            .await
        {
            Ok(()) => true,
            Err(KeyError::NotFound(unresolved)) => {
                tracing::warn!(l1_dc_id = %unresolved, "dropping L1 block: sender not registered");
                self.queue.clear_processing().await;
                return Ok(TickOutcome::Idle);
            }
            Err(_) => false,
        };

        let mut entries = Vec::with_capacity(l1_block.stripped_transactions.len());
        for (i, raw) in l1_block.stripped_transactions.iter().enumerate() {
            let txn: StrippedTransaction = match serde_json::from_str(raw) {
                Ok(txn) => txn,
                Err(_) => {
                    entries.push((format!("malformed-{i}"), false));
                    continue;
                }
            };

            let valid = if !l1_proof_valid {
                false
            } else {
                match self.resolver.verify_stripped_transaction(&txn.dc_id, &txn).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(txn_id = %txn.txn_id, error = %e, "stripped transaction failed verification");
                        false
                    }
                }
            };
            entries.push((txn.txn_id, valid));
        }

        let last = json::get_json::<LastBlockPointer>(self.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await?
            .unwrap_or_default();
        let next_block_id: u64 = last.id.parse().map(|n: u64| n + 1).unwrap_or(1);

        let mut block = L2Block {
            header: BlockHeader {
                dc_id: self.keypair.dc_id().to_string(),
                block_id: next_block_id,
                timestamp: crate::queue::now_unix_secs().to_string(),
                prev_proof: last.proof,
            },
            l1_dc_id: dto.dc_id.clone(),
            l1_block_id: dto.block_id,
            l1_proof: dto.proof.clone(),
            validations_str: L2Block::build_validations_str(&entries),
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
            .send(2, &dto.dc_id, dto.block_id, next_block_id, block.proof.as_proof_string())
            .await?;

        self.queue.clear_processing().await;
        Ok(TickOutcome::Produced { block_id: block_id_str })
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
    use crate::types::{AtRest, BroadcastDto, Registration};

    async fn make_executor() -> (L2Executor, Arc<InMemoryMatchmakingClient>, Arc<LocalKeypair>) {
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
        let executor = L2Executor {
            keypair: keypair.clone(),
            own_url: "https://l2.example".into(),
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
        (executor, mm, keypair)
    }

    #[tokio::test]
    async fn empty_queue_yields_idle() {
        let (executor, _mm, _kp) = make_executor().await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn a_valid_l1_block_with_no_transactions_verifies_clean() {
        let (executor, mm, _kp) = make_executor().await;

        let l1_key = crate::crypto::SigningKey::generate();
        let l1_dc_id = crate::crypto::calculate_public_id(&l1_key.public_key());
        mm.register(&Registration {
            dc_id: l1_dc_id.clone(),
            level: 1,
            url: "https://l1.example".into(),
            scheme: SupportedEncryption::Secp256k1,
            hash: SupportedHash::Sha256,
            public_key: hex::encode(l1_key.public_key().to_sec1_bytes()),
            version: "1.0.0".into(),
            region: None,
            cloud: None,
            wallet: None,
            funded: None,
        })
        .await
        .unwrap();

        let mut l1_block = L1Block {
            header: BlockHeader {
                dc_id: l1_dc_id.clone(),
                block_id: 1,
                timestamp: "1".into(),
                prev_proof: String::new(),
            },
            prev_id: String::new(),
            stripped_transactions: vec![],
            proof: Proof::Trust { signature: String::new() },
        };
        l1_block.apply_proof(ProofScheme::Trust, SupportedHash::Sha256, &l1_key, 0).unwrap();

        executor.queue.enqueue(l1_block.export_as_broadcast_dto(), None).await;
        let outcome = executor.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Produced { .. }));
    }
}
