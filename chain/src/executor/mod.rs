//! Level executors (C7): the per-level tick that advances one chain one
//! step, shared across L1-L5 as the ten-step skeleton from §4.7.
//!
//! Each level's input/output types differ enough (transactions vs. blocks,
//! single items vs. bundles) that a single generic `tick()` would need more
//! machinery than it saves; instead every level implements the same shape
//! by hand, and this module holds what they share: error types, the
//! registration-renewal timer, and the `recover`/`clear_processing`
//! bracket every tick opens and closes with.

pub mod l1;
pub mod l2;
pub mod l3;
pub mod l4;
pub mod l5;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::auth::{AuthError, RequestSigner, SharedKeyStore};
use crate::crypto::{CryptoError, SigningKey, SupportedHash};
use crate::keys::{KeyError, PeerKeyResolver};
use crate::matchmaking::MatchmakingError;
use crate::storage::StorageError;

/// Registration is renewed at most this often (§4.4: "chains re-register
/// periodically so matchmaking does not expire their entry").
pub const REGISTRATION_RENEWAL_INTERVAL: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("transport error: {0}")]
    Transport(String),
}

/// What a tick accomplished, for the scheduler's logging and metrics.
#[derive(Debug, Eq, PartialEq)]
pub enum TickOutcome {
    /// Nothing was queued; the tick returned immediately (§4.7 step 4).
    Idle,
    /// One block was produced, signed, and stored.
    Produced { block_id: String },
}

/// Tracks the last time this node's registration was renewed, so the
/// executor's step 1 ("renew registration if the timer fired") doesn't
/// hit matchmaking on every tick.
pub struct RegistrationRenewer {
    interval: Duration,
    last_renewed: Mutex<Option<Instant>>,
}

impl Default for RegistrationRenewer {
    fn default() -> Self {
        Self::new(REGISTRATION_RENEWAL_INTERVAL)
    }
}

impl RegistrationRenewer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_renewed: Mutex::new(None) }
    }

    /// Whether step 1 should fire this tick.
    pub fn due(&self) -> bool {
        match *self.last_renewed.lock().expect("lock poisoned") {
            None => true,
            Some(last) => last.elapsed() >= self.interval,
        }
    }

    pub fn mark_renewed(&self) {
        *self.last_renewed.lock().expect("lock poisoned") = Some(Instant::now());
    }
}

pub fn now_iso_timestamp() -> String {
    crate::queue::now_unix_secs().to_string()
}

/// The chain's own tip pointer: the id and proof of the last block this
/// node produced, kept at [`crate::storage::keys::LAST_BLOCK_PROOF`] so the
/// next tick can link to it (§3's `prev_id`/`prev_proof`).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LastBlockPointer {
    pub id: String,
    pub proof: String,
}

/// Builds this node's own [`crate::types::Registration`] for the renewal
/// call every level executor makes in tick step 1.
#[allow(clippy::too_many_arguments)]
pub fn build_registration(
    dc_id: &str,
    level: u8,
    url: &str,
    scheme: crate::crypto::SupportedEncryption,
    hash: crate::crypto::SupportedHash,
    verifying_key: &crate::crypto::VerifyingKey,
    region: Option<String>,
    cloud: Option<String>,
    wallet: Option<String>,
    funded: Option<bool>,
) -> crate::types::Registration {
    crate::types::Registration {
        dc_id: dc_id.to_string(),
        level,
        url: url.to_string(),
        scheme,
        hash,
        public_key: hex::encode(verifying_key.to_sec1_bytes()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        region,
        cloud,
        wallet,
        funded,
    }
}

/// Sends a level's signed proof back to the L1 chain that owns the claim
/// (§4.8): every level 2-5 tick ends by POSTing its own receipt upward to
/// `/v1/receipt` on the originating L1 chain, DC1-HMAC-signed.
pub struct ReceiptSender {
    own_dc_id: String,
    signing_key: SigningKey,
    hash: SupportedHash,
    resolver: Arc<PeerKeyResolver>,
    keystore: Arc<dyn SharedKeyStore>,
    http: reqwest::Client,
}

impl ReceiptSender {
    pub fn new(
        own_dc_id: String,
        signing_key: SigningKey,
        hash: SupportedHash,
        resolver: Arc<PeerKeyResolver>,
        keystore: Arc<dyn SharedKeyStore>,
    ) -> Self {
        Self { own_dc_id, signing_key, hash, resolver, keystore, http: reqwest::Client::new() }
    }

    pub async fn send(
        &self,
        level: u8,
        l1_dc_id: &str,
        l1_block_id: u64,
        sender_block_id: u64,
        signature: &str,
    ) -> Result<(), ExecutorError> {
        let peer = self.resolver.resolve(l1_dc_id).await?;
        let base_url = peer.registration.url.trim_end_matches('/').to_string();
        let signer = RequestSigner::new(
            self.own_dc_id.clone(),
            self.signing_key.clone(),
            self.hash,
            l1_dc_id.to_string(),
            format!("{base_url}/v1/interchain-auth-register"),
            self.keystore.clone(),
        );

        #[derive(Serialize)]
        struct ReceiptBody<'a> {
            l1_block_id: &'a str,
            level: u8,
            sender_dc_id: &'a str,
            sender_block_id: u64,
            signature: &'a str,
        }
        let l1_block_id_str = l1_block_id.to_string();
        let body = ReceiptBody {
            l1_block_id: &l1_block_id_str,
            level,
            sender_dc_id: &self.own_dc_id,
            sender_block_id,
            signature,
        };
        let body_bytes = serde_json::to_vec(&body).map_err(|e| ExecutorError::Transport(e.to_string()))?;

        let headers = signer.sign_request("POST", "/v1/receipt", "application/json", &body_bytes).await?;
        let mut request = self.http.post(format!("{base_url}/v1/receipt")).body(body_bytes);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| ExecutorError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExecutorError::Transport(format!("receipt post returned {}", response.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewer_fires_once_then_waits_out_the_interval() {
        let renewer = RegistrationRenewer::new(Duration::from_millis(20));
        assert!(renewer.due());
        renewer.mark_renewed();
        assert!(!renewer.due());
        std::thread::sleep(Duration::from_millis(25));
        assert!(renewer.due());
    }
}
