//! Broadcast processor (C8): the L1-only loop that schedules a freshly
//! produced L1 block for verification, promotes each level's collected
//! receipts to the next level once a claim fills, and replaces verifiers
//! that never respond (§4.8).
//!
//! Every other level's executor only looks at its own queue; this is the
//! one component with a global view of a claim's lifecycle, which is why
//! it lives outside `executor/` even though it runs on an L1 node.

pub mod dto;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::auth::{AuthError, RequestSigner, SharedKeyStore};
use crate::crypto::SupportedHash;
use crate::keys::{KeyError, LocalKeypair, PeerKeyResolver};
use crate::matchmaking::{MatchmakingClient, MatchmakingError};
use crate::storage::{ObjectStore, StorageError, json, keys};
use crate::types::block::L1AtRestDto;
use crate::types::LevelRequirement;

use dto::{DtoError, L3BroadcastItem, L4BroadcastItem, L5BroadcastItem, collect_receipt_rows};

/// A claim stays "not yet replaced" for this long after a level's
/// assignment before the processor looks for a non-responder to swap out.
pub const NON_RESPONDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Dto(#[from] DtoError),
    #[error("transport error: {0}")]
    Transport(String),
}

pub struct BroadcastProcessor {
    pub keypair: Arc<LocalKeypair>,
    pub storage: Arc<dyn ObjectStore>,
    pub matchmaking: Arc<dyn MatchmakingClient>,
    pub resolver: Arc<PeerKeyResolver>,
    pub keystore: Arc<dyn SharedKeyStore>,
    pub hash: SupportedHash,
    pub requirements: Vec<LevelRequirement>,
    http: reqwest::Client,
}

impl BroadcastProcessor {
    pub fn new(
        keypair: Arc<LocalKeypair>,
        storage: Arc<dyn ObjectStore>,
        matchmaking: Arc<dyn MatchmakingClient>,
        resolver: Arc<PeerKeyResolver>,
        keystore: Arc<dyn SharedKeyStore>,
        hash: SupportedHash,
        requirements: Vec<LevelRequirement>,
    ) -> Self {
        Self { keypair, storage, matchmaking, resolver, keystore, hash, requirements, http: reqwest::Client::new() }
    }

    /// One pass of the processor: schedule any new L1 block, promote any
    /// claim whose current level just filled, and replace stalled
    /// verifiers. Errors from one step don't abort the others.
    pub async fn tick(&self) {
        if let Err(e) = self.schedule_new_block().await {
            tracing::warn!(error = %e, "broadcast: scheduling new block failed");
        }
        if let Err(e) = self.promote_filled_claims().await {
            tracing::warn!(error = %e, "broadcast: promotion pass failed");
        }
        if let Err(e) = self.replace_non_responders().await {
            tracing::warn!(error = %e, "broadcast: non-responder pass failed");
        }
    }

    async fn schedule_new_block(&self) -> Result<(), BroadcastError> {
        let tip = json::get_json::<crate::executor::LastBlockPointer>(self.storage.as_ref(), keys::LAST_BLOCK_PROOF)
            .await?;
        let Some(tip) = tip else { return Ok(()) };
        if tip.id.is_empty() {
            return Ok(());
        }

        let already_scheduled = json::get_json::<String>(self.storage.as_ref(), keys::BROADCAST_LAST_BLOCK).await?;
        if already_scheduled.as_deref() == Some(tip.id.as_str()) {
            return Ok(());
        }

        let block = json::get_json::<L1AtRestDto>(self.storage.as_ref(), &keys::block(&tip.id)).await?;
        let Some(block) = block else { return Ok(()) };

        let claim = self.matchmaking.get_or_create_claim_check(&tip.id, &self.requirements).await?;
        self.fan_out(&claim, 2, "/v1/enqueue", &block).await;
        self.mark_assigned(&tip.id, 2).await?;

        json::put_json(self.storage.as_ref(), keys::BROADCAST_LAST_BLOCK, &tip.id).await?;
        self.storage.put(&keys::pending(&tip.id), Vec::new()).await?;
        json::put_json(self.storage.as_ref(), keys::BROADCAST_LAST_BROADCAST_TIME, &now()).await?;
        Ok(())
    }

    async fn promote_filled_claims(&self) -> Result<(), BroadcastError> {
        let pending_keys = self.storage.list(keys::PENDING_PREFIX).await?;
        for key in pending_keys {
            let Some(block_id) = key.strip_prefix(keys::PENDING_PREFIX) else { continue };
            let block_id = block_id.to_string();
            let claim = match self.matchmaking.get_claim_check(&block_id).await {
                Ok(claim) => claim,
                Err(MatchmakingError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            };

            for level in [2u8, 3, 4] {
                if self.storage.get(&keys::promoted(&block_id, level)).await?.is_some() {
                    continue;
                }
                if claim.is_accepting_verifications(level) {
                    continue;
                }
                self.promote(&block_id, &claim, level).await?;
            }

            // Level 5 is terminal: there is no level 6 to fan out to, so
            // "promoted" past 5 means the claim itself stopped accepting
            // level-5 verifications, not a `promoted(_, 5)` marker. Gating
            // on level 4 alone here would untrack the block before L5's
            // non-responders can ever be detected.
            if self.storage.get(&keys::promoted(&block_id, 4)).await?.is_some()
                && !claim.is_accepting_verifications(5)
            {
                self.storage.delete(&keys::pending(&block_id)).await?;
            }
        }
        Ok(())
    }

    async fn promote(&self, block_id: &str, claim: &crate::types::ClaimCheck, level: u8) -> Result<(), BroadcastError> {
        let required = claim.required_count(level);
        let rows = match collect_receipt_rows(self.storage.as_ref(), block_id, level, required).await {
            Ok(rows) => rows,
            Err(DtoError::NotEnoughVerifications { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let l1_block_id: u64 =
            block_id.parse().map_err(|_| BroadcastError::Transport(format!("block id {block_id} is not numeric")))?;
        let l1_dc_id = self.keypair.dc_id().to_string();
        let l1_block = json::get_json::<L1AtRestDto>(self.storage.as_ref(), &keys::block(block_id)).await?;
        let l1_proof = l1_block.map(|b| b.proof).unwrap_or_default();

        match level {
            2 => {
                let item = L3BroadcastItem { l1_dc_id, l1_block_id, l1_proof, l2_rows: rows };
                self.fan_out(claim, 3, "/v1/enqueue", &item).await;
            }
            3 => {
                let item = L4BroadcastItem { l1_dc_id, l1_block_id, l1_proof, l3_rows: rows };
                self.fan_out(claim, 4, "/v1/enqueue", &item).await;
            }
            4 => {
                let item = L5BroadcastItem { l1_dc_id, l1_block_id, l4_rows: rows };
                self.fan_out(claim, 5, "/v1/enqueue", &item).await;
            }
            _ => {}
        }

        self.storage.put(&keys::promoted(block_id, level), Vec::new()).await?;
        self.mark_assigned(block_id, level + 1).await?;
        Ok(())
    }

    async fn replace_non_responders(&self) -> Result<(), BroadcastError> {
        let pending_keys = self.storage.list(keys::PENDING_PREFIX).await?;
        for key in pending_keys {
            let Some(block_id) = key.strip_prefix(keys::PENDING_PREFIX) else { continue };
            let claim = match self.matchmaking.get_claim_check(block_id).await {
                Ok(claim) => claim,
                Err(_) => continue,
            };

            for level in [2u8, 3, 4, 5] {
                if !claim.is_accepting_verifications(level) {
                    continue;
                }
                let Some(assigned_at) =
                    json::get_json::<u64>(self.storage.as_ref(), &keys::assigned_at(block_id, level)).await?
                else {
                    continue;
                };
                if now().saturating_sub(assigned_at) < NON_RESPONDER_TIMEOUT.as_secs() {
                    continue;
                }
                let Some(targets) = claim.assignments.get(&level) else { continue };
                let Some(stale) = targets.iter().find(|dc_id| !claim.has_recorded(level, dc_id.as_str())) else {
                    continue;
                };
                tracing::warn!(block_id, level, stale_dc_id = %stale, "replacing non-responding verifier");
                self.matchmaking.overwrite_no_response_node(block_id, level, stale.as_str()).await?;
            }
        }
        Ok(())
    }

    async fn mark_assigned(&self, block_id: &str, level: u8) -> Result<(), BroadcastError> {
        json::put_json(self.storage.as_ref(), &keys::assigned_at(block_id, level), &now()).await?;
        Ok(())
    }

    async fn fan_out<T: Serialize + Sync>(&self, claim: &crate::types::ClaimCheck, level: u8, path: &str, body: &T) {
        let Some(targets) = claim.assignments.get(&level) else { return };
        for target in targets {
            if let Err(e) = self.post_signed(target, path, body).await {
                tracing::warn!(target_dc_id = %target, level, error = %e, "broadcast: fan-out delivery failed");
            }
        }
    }

    async fn post_signed<T: Serialize + Sync>(&self, target_dc_id: &str, path: &str, body: &T) -> Result<(), BroadcastError> {
        let peer = self.resolver.resolve(target_dc_id).await?;
        let base_url = peer.registration.url.trim_end_matches('/').to_string();
        let signer = RequestSigner::new(
            self.keypair.dc_id().to_string(),
            self.keypair.signing_key().clone(),
            self.hash,
            target_dc_id.to_string(),
            format!("{base_url}/v1/interchain-auth-register"),
            self.keystore.clone(),
        );
        let body_bytes = serde_json::to_vec(body).map_err(|e| BroadcastError::Transport(e.to_string()))?;
        let headers = signer.sign_request("POST", path, "application/json", &body_bytes).await?;
        let mut request = self.http.post(format!("{base_url}{path}")).body(body_bytes);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| BroadcastError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BroadcastError::Transport(format!("{path} returned {}", response.status())));
        }
        Ok(())
    }
}

fn now() -> u64 {
    crate::queue::now_unix_secs()
}
