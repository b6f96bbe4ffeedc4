//! L5 tick (§4.7): anchors a bundle of L4 attestations to a public chain.
//!
//! Unlike the original design's cross-block batching window, this executor
//! anchors one `L5BroadcastItem` (one originating L1 block's worth of L4
//! rows) per tick, mirroring L2-L4's one-item-per-tick shape. A node with
//! several pending items anchors them across consecutive ticks instead of
//! coalescing them into a single public-chain transaction.
//!
//! Anchoring itself is multi-phase, not a single dequeue-sign-store step:
//! a block is first published *unsigned* with its transaction hash pending
//! confirmation, and only signed once that transaction is actually seen on
//! the public chain. At most one anchor is in flight at a time; a tick
//! either advances the pending anchor (checking confirmation, re-publishing
//! if stale) or, once it's finalized, starts the next one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broadcast::dto::L5BroadcastItem;
use crate::crypto::{SupportedEncryption, SupportedHash};
use crate::keys::{KeyError, LocalKeypair, PeerKeyResolver};
use crate::matchmaking::{MatchmakingClient, MatchmakingError};
use crate::public_chain::PublicChainClient;
use crate::queue::Queue;
use crate::storage::{ObjectStore, json, keys};
use crate::types::block::{BlockHeader, L2ProofRow, L5AtRestDto, L5Block, Proof};
use crate::types::{AtRest, ProofScheme, SearchIndexEntry};

use super::{ExecutorError, LastBlockPointer, ReceiptSender, RegistrationRenewer, TickOutcome, build_registration};

/// Balance must cover this many multiples of the estimated transaction fee
/// before a new batch is anchored (§4.7, "insufficient funds to anchor").
pub const TRANSACTION_BUFFER: u64 = 5;

/// How many public-chain blocks may pass after a publish before the
/// transaction is assumed dropped and re-published.
pub const BROADCAST_RETRY_THRESHOLD_BLOCKS: u64 = 10;

/// The originating L1 chain/block a not-yet-confirmed anchor was built
/// from, stashed at publish time so `finalize_block` knows where to send
/// the finalising receipt once the transaction confirms.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PendingOrigin {
    l1_dc_id: String,
    l1_block_id: u64,
}

pub struct L5Executor {
    pub keypair: Arc<LocalKeypair>,
    pub own_url: String,
    pub wallet: String,
    pub network: String,
    pub queue: Arc<dyn Queue<L5BroadcastItem>>,
    pub storage: Arc<dyn ObjectStore>,
    pub matchmaking: Arc<dyn MatchmakingClient>,
    pub resolver: Arc<PeerKeyResolver>,
    pub receipts: Arc<ReceiptSender>,
    pub public_chain: Arc<dyn PublicChainClient>,
    pub hash: SupportedHash,
    pub proof_scheme: ProofScheme,
    pub complexity: u8,
    pub renewer: RegistrationRenewer,
}

impl L5Executor {
    pub async fn tick(&self) -> Result<TickOutcome, ExecutorError> {
        if self.renewer.due() {
            let registration = build_registration(
                self.keypair.dc_id(),
                5,
                &self.own_url,
                SupportedEncryption::Secp256k1,
                self.hash,
                &self.keypair.verifying_key(),
                None,
                None,
                Some(self.wallet.clone()),
                Some(true),
            );
            self.matchmaking.register(&registration).await?;
            self.renewer.mark_renewed();
        }

        if let Some(block_id) = self.pending_block_id().await? {
            let outcome = self.check_confirmations(&block_id).await?;
            self.process_claims_backlog().await?;
            return Ok(outcome);
        }

        self.process_claims_backlog().await?;
        self.produce_next_anchor().await
    }

    /// The block id of the anchor currently awaiting confirmation, if any.
    async fn pending_block_id(&self) -> Result<Option<String>, ExecutorError> {
        let Some(last_block) = json::get_json::<String>(self.storage.as_ref(), keys::BROADCAST_LAST_BLOCK).await?
        else {
            return Ok(None);
        };
        let last_confirmed =
            json::get_json::<String>(self.storage.as_ref(), keys::BROADCAST_LAST_CONFIRMED_BLOCK)
                .await?
                .unwrap_or_default();
        if last_confirmed == last_block { Ok(None) } else { Ok(Some(last_block)) }
    }

    /// §4.7 L5 step 4: checks each of the pending anchor's broadcast
    /// transaction hashes for confirmation. The first confirmed hash
    /// finalizes the block; hashes the public chain no longer recognizes
    /// are dropped; if none confirmed and the last publish is stale, the
    /// anchor is re-published.
    async fn check_confirmations(&self, block_id: &str) -> Result<TickOutcome, ExecutorError> {
        let Some(dto) = json::get_json::<L5AtRestDto>(self.storage.as_ref(), &keys::block(block_id)).await? else {
            return Ok(TickOutcome::Idle);
        };
        let mut block = l5_block_from_at_rest(&dto);

        let mut finalized_hash = None;
        let mut kept_hashes = Vec::with_capacity(block.transaction_hash.len());
        for tx_hash in std::mem::take(&mut block.transaction_hash) {
            if finalized_hash.is_some() {
                kept_hashes.push(tx_hash);
                continue;
            }
            match self.public_chain.is_transaction_confirmed(&tx_hash).await {
                Ok(true) => finalized_hash = Some(tx_hash),
                Ok(false) => kept_hashes.push(tx_hash),
                Err(e) => {
                    tracing::warn!(block_id = %block_id, tx_hash = %tx_hash, error = %e, "public chain lost the transaction, dropping hash");
                }
            }
        }
        block.transaction_hash = kept_hashes;

        if let Some(confirmed_hash) = finalized_hash {
            self.finalize_block(block_id, &mut block, &confirmed_hash).await?;
            return Ok(TickOutcome::Produced { block_id: block_id.to_string() });
        }

        if self.is_broadcast_stale(&block.block_last_sent_at).await? {
            tracing::warn!(block_id = %block_id, "anchor transaction stale, re-publishing");
            self.publish_to_public_chain(&mut block).await?;
        }
        json::put_json(self.storage.as_ref(), &keys::block(block_id), &block.export_as_at_rest()).await?;
        Ok(TickOutcome::Idle)
    }

    /// Signs the now-confirmed block, advances the chain tip, and dispatches
    /// the finalising receipt and claim resolution back to the originating
    /// L1 (§4.7 L5 step 4, §4.8 receipt dispatch). A failed receipt or claim
    /// resolution is logged, not propagated: the anchor itself already
    /// landed, so the tick must not be treated as failed over it.
    async fn finalize_block(
        &self,
        block_id: &str,
        block: &mut L5Block,
        confirmed_hash: &str,
    ) -> Result<(), ExecutorError> {
        block.transaction_hash = vec![confirmed_hash.to_string()];

        let last = json::get_json::<LastBlockPointer>(self.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await?
            .unwrap_or_default();
        block.header.prev_proof = last.proof;
        block.apply_proof(self.proof_scheme, self.hash, self.keypair.signing_key(), self.complexity)?;

        json::put_json(self.storage.as_ref(), &keys::block(block_id), &block.export_as_at_rest()).await?;
        json::put_json(
            self.storage.as_ref(),
            keys::LAST_BLOCK_PROOF,
            &LastBlockPointer { id: block_id.to_string(), proof: block.proof.as_proof_string().to_string() },
        )
        .await?;
        json::put_json(self.storage.as_ref(), keys::BROADCAST_LAST_CONFIRMED_BLOCK, &block_id.to_string()).await?;

        let origin_key = keys::l5_pending_origin(block_id);
        if let Some(origin) = json::get_json::<PendingOrigin>(self.storage.as_ref(), &origin_key).await? {
            if let Err(e) = self
                .receipts
                .send(5, &origin.l1_dc_id, origin.l1_block_id, block.header.block_id, block.proof.as_proof_string())
                .await
            {
                tracing::warn!(l1_dc_id = %origin.l1_dc_id, error = %e, "couldn't send finalising receipt, ignoring");
            }

            let claim_check_id = origin.l1_block_id.to_string();
            match self.matchmaking.resolve_claim_check(&claim_check_id).await {
                Ok(()) | Err(MatchmakingError::NotFound) => {}
                Err(e) if e.is_retryable() => self.push_failed_claim(&claim_check_id).await?,
                Err(e) => {
                    tracing::warn!(claim_check_id = %claim_check_id, error = %e, "claim resolution failed, not retrying");
                }
            }
            self.storage.delete(&origin_key).await?;
        }
        Ok(())
    }

    /// §4.7 L5 step 5: replays claim-check ids that previously failed to
    /// resolve with a retryable error, stopping at the first one that fails
    /// again so the remaining backlog keeps its order.
    async fn process_claims_backlog(&self) -> Result<(), ExecutorError> {
        let mut backlog = json::get_json::<Vec<String>>(self.storage.as_ref(), keys::BROADCAST_FAILED_CLAIMS)
            .await?
            .unwrap_or_default();
        if backlog.is_empty() {
            return Ok(());
        }

        let mut remaining = Vec::new();
        let mut iter = backlog.drain(..);
        for claim_check_id in iter.by_ref() {
            match self.matchmaking.resolve_claim_check(&claim_check_id).await {
                Ok(()) | Err(MatchmakingError::NotFound) => {}
                Err(e) if e.is_retryable() => {
                    tracing::warn!(claim_check_id = %claim_check_id, error = %e, "claim still unresolvable, stopping backlog for this tick");
                    remaining.push(claim_check_id);
                    break;
                }
                Err(e) => {
                    tracing::warn!(claim_check_id = %claim_check_id, error = %e, "claim resolution failed, dropping from backlog");
                }
            }
        }
        remaining.extend(iter);
        json::put_json(self.storage.as_ref(), keys::BROADCAST_FAILED_CLAIMS, &remaining).await?;
        Ok(())
    }

    async fn push_failed_claim(&self, claim_check_id: &str) -> Result<(), ExecutorError> {
        let mut backlog = json::get_json::<Vec<String>>(self.storage.as_ref(), keys::BROADCAST_FAILED_CLAIMS)
            .await?
            .unwrap_or_default();
        if !backlog.iter().any(|id| id == claim_check_id) {
            backlog.push(claim_check_id.to_string());
        }
        json::put_json(self.storage.as_ref(), keys::BROADCAST_FAILED_CLAIMS, &backlog).await?;
        Ok(())
    }

    /// §4.7 L5 step 2: the balance must cover `TRANSACTION_BUFFER` multiples
    /// of the current network fee estimate.
    async fn has_funds_for_transactions(&self) -> Result<bool, ExecutorError> {
        let balance =
            self.public_chain.get_balance(&self.wallet).await.map_err(|e| ExecutorError::Transport(e.to_string()))?;
        let fee = self
            .public_chain
            .estimate_transaction_fee()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        Ok(fee.saturating_mul(TRANSACTION_BUFFER) < balance)
    }

    /// Whether the public chain has advanced far enough past the last
    /// publish that the transaction should be assumed dropped.
    async fn is_broadcast_stale(&self, block_last_sent_at: &str) -> Result<bool, ExecutorError> {
        if block_last_sent_at.is_empty() {
            return Ok(false);
        }
        let sent_at: u64 = block_last_sent_at.parse().unwrap_or(0);
        let current = self
            .public_chain
            .current_block_id()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        Ok(current.saturating_sub(sent_at) >= BROADCAST_RETRY_THRESHOLD_BLOCKS)
    }

    /// §4.7 L5 step 3d: hashes and publishes the block, stamping the
    /// transaction hash, network, and sending block height onto it. The
    /// block is left unsigned; signing happens once `check_confirmations`
    /// sees the transaction land.
    async fn publish_to_public_chain(&self, block: &mut L5Block) -> Result<(), ExecutorError> {
        let digest = crate::crypto::hash_bytes(self.hash, &block.canonical_bytes());
        let tx_hash = self
            .public_chain
            .publish_l5_hash_to_public_network(&digest)
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        let current_block = self
            .public_chain
            .current_block_id()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        block.transaction_hash.push(tx_hash);
        block.network = self.network.clone();
        block.block_last_sent_at = current_block.to_string();
        Ok(())
    }

    /// §4.7 L5 steps 1-3: dequeues the next batch of L4 rows, verifies each,
    /// checks funds, and publishes an unsigned anchor block for it.
    async fn produce_next_anchor(&self) -> Result<TickOutcome, ExecutorError> {
        if self.queue.has_processing().await {
            self.queue.recover().await;
        }

        let bundle = match self.queue.get_next_block().await {
            Some(bundle) => bundle,
            None => return Ok(TickOutcome::Idle),
        };

        let mut kept = Vec::with_capacity(bundle.l4_rows.len());
        for row in &bundle.l4_rows {
            match self.verify_l4_row(row).await {
                Ok(()) => kept.push(row.clone()),
                Err(KeyError::NotFound(dc_id)) => {
                    tracing::warn!(l4_dc_id = %dc_id, "dropping L4 row: sender not registered");
                }
                Err(e) => {
                    tracing::warn!(l4_dc_id = %row.dc_id, error = %e, "dropping L4 row: proof invalid");
                }
            }
        }

        if kept.is_empty() {
            self.queue.clear_processing().await;
            return Ok(TickOutcome::Idle);
        }

        if !self.has_funds_for_transactions().await? {
            tracing::warn!(wallet = %self.wallet, "insufficient funds to anchor, requeuing batch");
            self.queue.enqueue(bundle, None).await;
            self.queue.clear_processing().await;
            return Ok(TickOutcome::Idle);
        }

        for (i, row) in kept.iter().enumerate() {
            let batch_id = format!("{}-{}", bundle.l1_block_id, i);
            json::put_json(self.storage.as_ref(), &keys::to_broadcast(&bundle.l1_block_id.to_string(), &batch_id), row)
                .await?;
        }

        let l4_blocks: Vec<String> =
            kept.iter().map(|row| format!("{}:{}:{}", bundle.l1_dc_id, row.dc_id, row.block_id)).collect();

        let prior_tip = json::get_json::<String>(self.storage.as_ref(), keys::BROADCAST_LAST_BLOCK).await?;
        let next_block_id: u64 = prior_tip.as_deref().and_then(|id| id.parse::<u64>().ok()).map(|n| n + 1).unwrap_or(1);
        let last = json::get_json::<LastBlockPointer>(self.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await?
            .unwrap_or_default();

        let mut block = L5Block {
            header: BlockHeader {
                dc_id: self.keypair.dc_id().to_string(),
                block_id: next_block_id,
                timestamp: crate::queue::now_unix_secs().to_string(),
                prev_proof: last.proof,
            },
            l4_blocks,
            transaction_hash: Vec::new(),
            network: self.network.clone(),
            block_last_sent_at: String::new(),
            proof: Proof::Trust { signature: String::new() },
        };
        self.publish_to_public_chain(&mut block).await?;

        let block_id_str = next_block_id.to_string();
        json::put_json(self.storage.as_ref(), &keys::block(&block_id_str), &block.export_as_at_rest()).await?;
        json::put_json(self.storage.as_ref(), &keys::search_index(&block_id_str), &block.export_as_search_index())
            .await?;
        json::put_json(
            self.storage.as_ref(),
            &keys::l5_pending_origin(&block_id_str),
            &PendingOrigin { l1_dc_id: bundle.l1_dc_id.clone(), l1_block_id: bundle.l1_block_id },
        )
        .await?;
        json::put_json(self.storage.as_ref(), keys::BROADCAST_LAST_BLOCK, &block_id_str).await?;
        self.storage.delete_prefix(&keys::to_broadcast_prefix(&bundle.l1_block_id.to_string())).await?;

        self.queue.clear_processing().await;
        Ok(TickOutcome::Produced { block_id: block_id_str })
    }

    /// Mirrors L3/L4's lightweight attestation check against `dc_id:block_id`.
    async fn verify_l4_row(&self, row: &L2ProofRow) -> Result<(), KeyError> {
        let message = format!("{}:{}", row.dc_id, row.block_id);
        let proof = Proof::Trust { signature: row.proof.clone() };
        self.resolver.verify_block_proof(&row.dc_id, message.as_bytes(), &proof, self.complexity).await
    }
}

fn l5_block_from_at_rest(dto: &L5AtRestDto) -> L5Block {
    let proof = match dto.scheme {
        ProofScheme::Trust => Proof::Trust { signature: dto.proof.clone() },
        ProofScheme::Work => Proof::Work { digest: dto.proof.clone(), nonce: dto.nonce.unwrap_or(0) },
    };
    L5Block {
        header: BlockHeader {
            dc_id: dto.dc_id.clone(),
            block_id: dto.block_id,
            timestamp: dto.timestamp.clone(),
            prev_proof: dto.prev_proof.clone(),
        },
        l4_blocks: dto.l4_blocks.clone(),
        transaction_hash: dto.transaction_hash.clone(),
        network: dto.network.clone(),
        block_last_sent_at: dto.block_last_sent_at.clone(),
        proof,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemorySharedKeyStore;
    use crate::keys::InMemorySecretStore;
    use crate::matchmaking::fake::InMemoryMatchmakingClient;
    use crate::public_chain::FakePublicChainClient;
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryObjectStore;

    async fn make_executor(balance: u64) -> (L5Executor, Arc<InMemoryMatchmakingClient>) {
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
        let executor = L5Executor {
            keypair,
            own_url: "https://l5.example".into(),
            wallet: "1L5Wallet".into(),
            network: "fake-public-chain".into(),
            queue: Arc::new(InMemoryQueue::default()),
            storage: Arc::new(InMemoryObjectStore::default()),
            matchmaking: mm.clone(),
            resolver,
            receipts,
            public_chain: Arc::new(FakePublicChainClient::new(balance)),
            hash: SupportedHash::Sha256,
            proof_scheme: ProofScheme::Trust,
            complexity: 0,
            renewer: RegistrationRenewer::new(std::time::Duration::from_secs(1)),
        };
        (executor, mm)
    }

    fn unresolvable_bundle() -> L5BroadcastItem {
        L5BroadcastItem {
            l1_dc_id: "l1-chain".into(),
            l1_block_id: 1,
            l4_rows: vec![L2ProofRow { dc_id: "ghost".into(), block_id: 1, proof: "sig".into() }],
        }
    }

    /// A bundle with one L4 row signed by a key registered at level 4, so it
    /// survives `verify_l4_row` and `kept` is non-empty.
    async fn resolvable_bundle(mm: &InMemoryMatchmakingClient) -> L5BroadcastItem {
        use base64::Engine;
        use crate::crypto::{SupportedEncryption, calculate_public_id};
        use crate::types::Registration;

        let l4_key = crate::crypto::SigningKey::generate();
        let l4_dc_id = calculate_public_id(&l4_key.public_key());
        mm.register(&Registration {
            dc_id: l4_dc_id.clone(),
            level: 4,
            url: "https://l4.example".into(),
            scheme: SupportedEncryption::Secp256k1,
            hash: SupportedHash::Sha256,
            public_key: hex::encode(l4_key.public_key().to_sec1_bytes()),
            version: "1.0.0".into(),
            region: None,
            cloud: None,
            wallet: None,
            funded: None,
        })
        .await
        .unwrap();

        let message = format!("{l4_dc_id}:{}", 1u64);
        let digest = crate::crypto::hash_bytes(SupportedHash::Sha256, message.as_bytes());
        let digest32: [u8; 32] = digest.try_into().unwrap();
        let raw_sig = crate::crypto::sign(&l4_key, &digest32).unwrap();
        let signature = base64::engine::general_purpose::STANDARD.encode(raw_sig);

        L5BroadcastItem {
            l1_dc_id: "l1-chain".into(),
            l1_block_id: 1,
            l4_rows: vec![L2ProofRow { dc_id: l4_dc_id, block_id: 1, proof: signature }],
        }
    }

    #[tokio::test]
    async fn empty_queue_yields_idle() {
        let (executor, _mm) = make_executor(1_000).await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn no_funds_requeues_rather_than_anchoring() {
        let (executor, mm) = make_executor(0).await;
        let bundle = resolvable_bundle(&mm).await;
        executor.queue.enqueue(bundle, None).await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
        assert!(!executor.queue.has_processing().await);
        assert!(executor.queue.get_next_block().await.is_some());
    }

    #[tokio::test]
    async fn a_bundle_with_no_resolvable_rows_drops_to_idle() {
        let (executor, _mm) = make_executor(1_000).await;
        executor.queue.enqueue(unresolvable_bundle(), None).await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn an_anchor_publishes_unsigned_then_confirms_and_signs() {
        let (executor, mm) = make_executor(1_000).await;
        let bundle = resolvable_bundle(&mm).await;
        executor.queue.enqueue(bundle, None).await;

        let produced = executor.tick().await.unwrap();
        assert!(matches!(produced, TickOutcome::Produced { .. }));

        let dto = json::get_json::<L5AtRestDto>(executor.storage.as_ref(), &keys::block("1")).await.unwrap().unwrap();
        assert!(dto.proof.is_empty());
        assert_eq!(dto.transaction_hash.len(), 1);

        // First confirmation check: the fake confirms on the second lookup.
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
        let still_pending =
            json::get_json::<L5AtRestDto>(executor.storage.as_ref(), &keys::block("1")).await.unwrap().unwrap();
        assert!(still_pending.proof.is_empty());

        let finalized = executor.tick().await.unwrap();
        assert_eq!(finalized, TickOutcome::Produced { block_id: "1".into() });
        let signed = json::get_json::<L5AtRestDto>(executor.storage.as_ref(), &keys::block("1")).await.unwrap().unwrap();
        assert!(!signed.proof.is_empty());

        let last_confirmed =
            json::get_json::<String>(executor.storage.as_ref(), keys::BROADCAST_LAST_CONFIRMED_BLOCK)
                .await
                .unwrap();
        assert_eq!(last_confirmed.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn finalizing_with_no_matching_claim_check_is_not_fatal() {
        // No claim check was ever created for l1 block "1" in this test, so
        // `resolve_claim_check` returns `NotFound`; finalize_block must treat
        // that the same as a successful resolution rather than erroring.
        let (executor, mm) = make_executor(1_000).await;
        let bundle = resolvable_bundle(&mm).await;
        executor.queue.enqueue(bundle, None).await;

        executor.tick().await.unwrap();
        executor.tick().await.unwrap();
        let finalized = executor.tick().await.unwrap();
        assert_eq!(finalized, TickOutcome::Produced { block_id: "1".into() });

        let backlog = json::get_json::<Vec<String>>(executor.storage.as_ref(), keys::BROADCAST_FAILED_CLAIMS)
            .await
            .unwrap()
            .unwrap_or_default();
        assert!(backlog.is_empty());
    }
}
