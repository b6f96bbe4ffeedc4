//! L3 tick (§4.7): aggregates a bundle of L2 verification proofs into one
//! diversity-scored block.

use std::collections::HashSet;
use std::sync::Arc;

use crate::broadcast::dto::L3BroadcastItem;
use crate::crypto::{SupportedEncryption, SupportedHash};
use crate::keys::{KeyError, LocalKeypair, PeerKeyResolver};
use crate::matchmaking::MatchmakingClient;
use crate::queue::Queue;
use crate::storage::{ObjectStore, json, keys};
use crate::types::block::{BlockHeader, L2ProofRow, L3Block, Proof};
use crate::types::{AtRest, ProofScheme, SearchIndexEntry};

use super::{ExecutorError, LastBlockPointer, ReceiptSender, RegistrationRenewer, TickOutcome, build_registration};

pub struct L3Executor {
    pub keypair: Arc<LocalKeypair>,
    pub own_url: String,
    pub queue: Arc<dyn Queue<L3BroadcastItem>>,
    pub storage: Arc<dyn ObjectStore>,
    pub matchmaking: Arc<dyn MatchmakingClient>,
    pub resolver: Arc<PeerKeyResolver>,
    pub receipts: Arc<ReceiptSender>,
    pub hash: SupportedHash,
    pub proof_scheme: ProofScheme,
    pub complexity: u8,
    pub renewer: RegistrationRenewer,
}

impl L3Executor {
    pub async fn tick(&self) -> Result<TickOutcome, ExecutorError> {
        if self.renewer.due() {
            let registration = build_registration(
                self.keypair.dc_id(),
                3,
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

        let mut kept = Vec::with_capacity(bundle.l2_rows.len());
        let mut regions: HashSet<String> = HashSet::new();
        let mut clouds: HashSet<String> = HashSet::new();
        for row in &bundle.l2_rows {
            match self.verify_l2_row(row).await {
                Ok(()) => {}
                Err(KeyError::NotFound(dc_id)) => {
                    tracing::warn!(l2_dc_id = %dc_id, "dropping L2 row: sender not registered");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(l2_dc_id = %row.dc_id, error = %e, "dropping L2 row: proof invalid");
                    continue;
                }
            }
            if let Ok(peer) = self.resolver.resolve(&row.dc_id).await {
                if let Some(region) = &peer.registration.region {
                    regions.insert(region.clone());
                }
                if let Some(cloud) = &peer.registration.cloud {
                    clouds.insert(cloud.clone());
                }
            }
            kept.push(row.clone());
        }

        if kept.is_empty() {
            self.queue.clear_processing().await;
            return Ok(TickOutcome::Idle);
        }

        let mut regions: Vec<String> = regions.into_iter().collect();
        regions.sort();
        let mut clouds: Vec<String> = clouds.into_iter().collect();
        clouds.sort();

        let last = json::get_json::<LastBlockPointer>(self.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await?
            .unwrap_or_default();
        let next_block_id: u64 = last.id.parse().map(|n: u64| n + 1).unwrap_or(1);

        let mut block = L3Block {
            header: BlockHeader {
                dc_id: self.keypair.dc_id().to_string(),
                block_id: next_block_id,
                timestamp: crate::queue::now_unix_secs().to_string(),
                prev_proof: last.proof,
            },
            l1_dc_id: bundle.l1_dc_id.clone(),
            l1_block_id: bundle.l1_block_id,
            l1_proof: bundle.l1_proof.clone(),
            l2_count: kept.len() as u32,
            ddss: diversity_score(&regions, &clouds),
            l2_proofs: kept,
            regions,
            clouds,
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
            .send(3, &bundle.l1_dc_id, bundle.l1_block_id, next_block_id, block.proof.as_proof_string())
            .await?;

        self.queue.clear_processing().await;
        Ok(TickOutcome::Produced { block_id: block_id_str })
    }

    /// Verifies a stored L2 attestation against `dc_id:block_id`, not the
    /// full L2 canonical bytes: the receipt row (§4.8) only carries
    /// `{dc_id, block_id, proof}`, not the L2 block body that produced it.
    async fn verify_l2_row(&self, row: &L2ProofRow) -> Result<(), KeyError> {
        let message = format!("{}:{}", row.dc_id, row.block_id);
        let proof = Proof::Trust { signature: row.proof.clone() };
        self.resolver.verify_block_proof(&row.dc_id, message.as_bytes(), &proof, self.complexity).await
    }
}

/// Diversity-of-deployment score (§4.7): a chain-count-free measure of how
/// spread out the contributing L2 chains were, scaled to `[0, 1]`.
fn diversity_score(regions: &[String], clouds: &[String]) -> f64 {
    let distinct = (regions.len() + clouds.len()) as f64;
    if distinct <= 0.0 {
        0.0
    } else {
        (distinct / 10.0).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use crate::auth::InMemorySharedKeyStore;
    use crate::keys::InMemorySecretStore;
    use crate::matchmaking::fake::InMemoryMatchmakingClient;
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryObjectStore;
    use crate::types::Registration;

    async fn make_executor() -> (L3Executor, Arc<InMemoryMatchmakingClient>) {
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
        let executor = L3Executor {
            keypair,
            own_url: "https://l3.example".into(),
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
    async fn a_bundle_with_no_resolvable_rows_drops_to_idle() {
        let (executor, _mm) = make_executor().await;
        executor
            .queue
            .enqueue(
                L3BroadcastItem {
                    l1_dc_id: "l1-chain".into(),
                    l1_block_id: 1,
                    l1_proof: "sig".into(),
                    l2_rows: vec![L2ProofRow { dc_id: "ghost".into(), block_id: 1, proof: "sig".into() }],
                },
                None,
            )
            .await;
        assert_eq!(executor.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn a_valid_l2_row_is_folded_into_a_produced_block() {
        let (executor, mm) = make_executor().await;
        let l2_key = crate::crypto::SigningKey::generate();
        let l2_dc_id = crate::crypto::calculate_public_id(&l2_key.public_key());
        mm.register(&Registration {
            dc_id: l2_dc_id.clone(),
            level: 2,
            url: "https://l2.example".into(),
            scheme: SupportedEncryption::Secp256k1,
            hash: SupportedHash::Sha256,
            public_key: hex::encode(l2_key.public_key().to_sec1_bytes()),
            version: "1.0.0".into(),
            region: Some("us-west".into()),
            cloud: Some("aws".into()),
            wallet: None,
            funded: None,
        })
        .await
        .unwrap();

        let message = format!("{l2_dc_id}:{}", 1u64);
        let digest = crate::crypto::hash_bytes(SupportedHash::Sha256, message.as_bytes());
        let digest32: [u8; 32] = digest.try_into().unwrap();
        let raw_sig = crate::crypto::sign(&l2_key, &digest32).unwrap();
        let signature = base64::engine::general_purpose::STANDARD.encode(raw_sig);
        executor
            .queue
            .enqueue(
                L3BroadcastItem {
                    l1_dc_id: "l1-chain".into(),
                    l1_block_id: 1,
                    l1_proof: "sig".into(),
                    l2_rows: vec![L2ProofRow { dc_id: l2_dc_id, block_id: 1, proof: signature }],
                },
                None,
            )
            .await;
        let outcome = executor.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Produced { .. }));
    }
}
