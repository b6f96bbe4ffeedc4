//! L1 tick (§4.7): fixates queued transactions into a signed block.

use std::sync::Arc;

use crate::callback::CallbackDispatcher;
use crate::crypto::{SupportedEncryption, SupportedHash};
use crate::keys::{KeyError, LocalKeypair, PeerKeyResolver};
use crate::matchmaking::MatchmakingClient;
use crate::queue::{Queue, now_unix_secs};
use crate::storage::{ObjectStore, json, keys};
use crate::transaction_type::TransactionTypeRegistry;
use crate::types::block::{BlockHeader, L1Block, Proof};
use crate::types::{AtRest, ProofScheme, SearchIndexEntry, Transaction, l1_block_id_for_timestamp};

use super::{ExecutorError, LastBlockPointer, RegistrationRenewer, TickOutcome, build_registration};

pub struct L1Executor {
    pub keypair: Arc<LocalKeypair>,
    pub own_url: String,
    pub queue: Arc<dyn Queue<Transaction>>,
    pub storage: Arc<dyn ObjectStore>,
    pub matchmaking: Arc<dyn MatchmakingClient>,
    pub resolver: Arc<PeerKeyResolver>,
    pub transaction_types: Arc<dyn TransactionTypeRegistry>,
    pub callbacks: Arc<dyn CallbackDispatcher>,
    pub hash: SupportedHash,
    pub proof_scheme: ProofScheme,
    pub complexity: u8,
    pub renewer: RegistrationRenewer,
}

impl L1Executor {
    pub async fn tick(&self) -> Result<TickOutcome, ExecutorError> {
        if self.renewer.due() {
            let registration = build_registration(
                self.keypair.dc_id(),
                1,
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

        let dequeued = self.queue.get_new_transactions().await;
        if dequeued.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let now = now_unix_secs();
        let current_block_id = l1_block_id_for_timestamp(now);

        let mut kept = Vec::with_capacity(dequeued.len());
        for mut txn in dequeued {
            if let Err(e) = self.transaction_types.validate(&txn.txn_type) {
                tracing::warn!(txn_id = %txn.txn_id, error = %e, "dropping transaction: invalid txn_type");
                continue;
            }
            match self.resolver.verify_full_transaction(&txn.dc_id, &txn).await {
                Ok(()) => {}
                Err(KeyError::NotFound(dc_id)) => {
                    tracing::warn!(txn_id = %txn.txn_id, sender = %dc_id, "dropping transaction: sender not registered");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(txn_id = %txn.txn_id, error = %e, "dropping transaction: signature verification failed");
                    continue;
                }
            }
            txn.block_id = Some(current_block_id);
            kept.push(txn);
        }

        if kept.is_empty() {
            self.queue.clear_processing().await;
            return Ok(TickOutcome::Idle);
        }

        let mut stripped_transactions = Vec::with_capacity(kept.len());
        let mut custom_indexes: Vec<(String, Vec<String>)> = Vec::new();
        for txn in &kept {
            let stripped = txn.strip();
            let encoded = serde_json::to_string(&stripped)
                .map_err(|e| crate::keys::KeyError::Corrupt(e.to_string()))?;
            stripped_transactions.push(encoded);

            // Activation is resolved here so a transaction's declared type is
            // only indexed once its definition has taken effect.
            let indexes = self.transaction_types.active_custom_indexes(&txn.txn_type, current_block_id);
            if !indexes.is_empty() {
                custom_indexes.push((txn.txn_id.clone(), indexes));
            }

            if let Some(invoker) = &txn.invoker {
                self.callbacks.dispatch(invoker, &txn.txn_id, current_block_id).await;
            }
        }

        let last = json::get_json::<LastBlockPointer>(self.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await?
            .unwrap_or_default();

        let mut block = L1Block {
            header: BlockHeader {
                dc_id: self.keypair.dc_id().to_string(),
                block_id: current_block_id,
                timestamp: now.to_string(),
                prev_proof: last.proof,
            },
            prev_id: last.id,
            stripped_transactions,
            proof: Proof::Trust { signature: String::new() },
        };
        block.apply_proof(self.proof_scheme, self.hash, self.keypair.signing_key(), self.complexity)?;

        let block_id_str = current_block_id.to_string();
        json::put_json(self.storage.as_ref(), &keys::block(&block_id_str), &block.export_as_at_rest()).await?;
        json::put_json(self.storage.as_ref(), &keys::transactions(&block_id_str), &kept).await?;
        if !custom_indexes.is_empty() {
            json::put_json(self.storage.as_ref(), &keys::custom_indexes(&block_id_str), &custom_indexes).await?;
        }
        json::put_json(self.storage.as_ref(), &keys::search_index(&block_id_str), &block.export_as_search_index())
            .await?;

        let payload_blob = kept
            .iter()
            .map(|t| String::from_utf8_lossy(&t.payload).into_owned())
            .collect::<Vec<_>>()
            .join("\n");
        self.storage.put(&keys::payloads(&block_id_str), payload_blob.into_bytes()).await?;

        json::put_json(
            self.storage.as_ref(),
            keys::LAST_BLOCK_PROOF,
            &LastBlockPointer { id: block_id_str.clone(), proof: block.proof.as_proof_string().to_string() },
        )
        .await?;

        self.queue.clear_processing().await;
        Ok(TickOutcome::Produced { block_id: block_id_str })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::RecordingCallbackDispatcher;
    use crate::keys::InMemorySecretStore;
    use crate::matchmaking::fake::InMemoryMatchmakingClient;
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryObjectStore;
    use crate::transaction_type::InMemoryTransactionTypeRegistry;

    fn dummy_txn(dc_id: &str) -> Transaction {
        Transaction {
            txn_id: uuid::Uuid::new_v4().to_string(),
            txn_type: "".into(),
            dc_id: dc_id.into(),
            block_id: None,
            timestamp: now_unix_secs().to_string(),
            tag: "".into(),
            invoker: None,
            payload: b"{}".to_vec(),
            full_hash: String::new(),
            signature: String::new(),
        }
    }

    async fn make_executor() -> (L1Executor, Arc<InMemoryMatchmakingClient>) {
        let keypair = Arc::new(LocalKeypair::load_or_generate(&InMemorySecretStore::default()).unwrap());
        let mm = Arc::new(InMemoryMatchmakingClient::default());
        let resolver = Arc::new(PeerKeyResolver::new(mm.clone()));
        let executor = L1Executor {
            keypair,
            own_url: "https://l1.example".into(),
            queue: Arc::new(InMemoryQueue::default()),
            storage: Arc::new(InMemoryObjectStore::default()),
            matchmaking: mm.clone(),
            resolver,
            transaction_types: Arc::new(InMemoryTransactionTypeRegistry::default()),
            callbacks: Arc::new(RecordingCallbackDispatcher::default()),
            hash: SupportedHash::Sha256,
            proof_scheme: ProofScheme::Trust,
            complexity: 0,
            renewer: RegistrationRenewer::new(std::time::Duration::from_secs(1)),
        };
        (executor, mm)
    }

    #[tokio::test]
    async fn empty_queue_yields_idle_without_touching_storage() {
        let (executor, _mm) = make_executor().await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn a_valid_self_signed_transaction_is_fixated_into_a_block() {
        let (executor, mm) = make_executor().await;

        let mut txn = dummy_txn(executor.keypair.dc_id());
        txn.sign(executor.keypair.signing_key(), executor.hash).unwrap();

        let registration = build_registration(
            executor.keypair.dc_id(),
            1,
            "https://self.example",
            SupportedEncryption::Secp256k1,
            executor.hash,
            &executor.keypair.verifying_key(),
            None,
            None,
            None,
            None,
        );
        mm.register(&registration).await.unwrap();

        executor.queue.enqueue(txn, None).await;
        let outcome = executor.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Produced { .. }));

        let last = json::get_json::<LastBlockPointer>(executor.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await
            .unwrap()
            .unwrap();
        assert!(!last.proof.is_empty());
    }

    #[tokio::test]
    async fn a_transaction_from_an_unregistered_sender_is_dropped_not_fatal() {
        let (executor, _mm) = make_executor().await;
        let mut txn = dummy_txn("ghost-chain");
        txn.sign(executor.keypair.signing_key(), executor.hash).unwrap();

        executor.queue.enqueue(txn, None).await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
    }
}
