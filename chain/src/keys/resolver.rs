//! Per-chain public-key resolution via matchmaking (§4.2).
//!
//! Resolution failure (the remote chain isn't registered) must never be
//! treated as "the block is invalid" — callers drop the block from
//! processing instead (§4.7). That distinction is why [`KeyError::NotFound`]
//! is its own variant rather than folding into [`crate::crypto::CryptoError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::crypto::{SupportedHash, VerifyingKey, hash_bytes};
use crate::matchmaking::{MatchmakingClient, MatchmakingError};
use crate::types::{Registration, StrippedTransaction, Transaction};

use super::KeyError;

/// A cached, already-parsed view of a [`Registration`] sufficient to
/// verify proofs and transactions from that chain.
#[derive(Clone)]
pub struct PeerRecord {
    pub dc_id: String,
    pub level: u8,
    pub hash: SupportedHash,
    pub verifying_key: VerifyingKey,
    pub registration: Registration,
}

impl TryFrom<Registration> for PeerRecord {
    type Error = KeyError;

    fn try_from(registration: Registration) -> Result<Self, Self::Error> {
        let key_bytes = hex::decode(&registration.public_key)
            .map_err(|e| KeyError::Corrupt(format!("bad public key hex: {e}")))?;
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&key_bytes).map_err(|e| KeyError::Corrupt(e.to_string()))?;
        Ok(Self {
            dc_id: registration.dc_id.clone(),
            level: registration.level,
            hash: registration.hash,
            verifying_key,
            registration,
        })
    }
}

/// Fetches and caches peer registration records, exposing a uniform
/// verify surface over blocks and transactions (§4.2).
pub struct PeerKeyResolver {
    matchmaking: Arc<dyn MatchmakingClient>,
    cache: Mutex<HashMap<String, PeerRecord>>,
}

impl PeerKeyResolver {
    pub fn new(matchmaking: Arc<dyn MatchmakingClient>) -> Self {
        Self { matchmaking, cache: Mutex::new(HashMap::new()) }
    }

    /// Looks up `dc_id`, using the local cache before falling back to
    /// matchmaking. A matchmaking 404 becomes [`KeyError::NotFound`].
    pub async fn resolve(&self, dc_id: &str) -> Result<PeerRecord, KeyError> {
        if let Some(cached) = self.cache.lock().expect("lock poisoned").get(dc_id).cloned() {
            return Ok(cached);
        }

        let registration = self.matchmaking.get_registration(dc_id).await.map_err(|e| match e {
            MatchmakingError::NotFound => KeyError::NotFound(dc_id.to_string()),
            other => KeyError::Store(other.to_string()),
        })?;
        let record = PeerRecord::try_from(registration)?;
        self.cache.lock().expect("lock poisoned").insert(dc_id.to_string(), record.clone());
        Ok(record)
    }

    pub fn invalidate(&self, dc_id: &str) {
        self.cache.lock().expect("lock poisoned").remove(dc_id);
    }

    /// Verifies a block-level proof's canonical bytes against `dc_id`'s
    /// registered key and complexity. Callers pass the already-built
    /// canonical message bytes and proof, since the proof shape differs
    /// per block level (§3).
    pub async fn verify_block_proof(
        &self,
        dc_id: &str,
        message: &[u8],
        proof: &crate::types::Proof,
        complexity: u8,
    ) -> Result<(), KeyError> {
        let peer = self.resolve(dc_id).await?;
        verify_against_peer(&peer, message, proof, complexity)
    }

    pub async fn verify_stripped_transaction(
        &self,
        dc_id: &str,
        txn: &StrippedTransaction,
    ) -> Result<(), KeyError> {
        let peer = self.resolve(dc_id).await?;
        txn.verify_stripped(&peer.verifying_key, peer.hash)
            .map_err(|e| KeyError::Corrupt(e.to_string()))
    }

    pub async fn verify_full_transaction(&self, dc_id: &str, txn: &Transaction) -> Result<(), KeyError> {
        let peer = self.resolve(dc_id).await?;
        crate::types::tx::verify_full_transaction(txn, &peer.verifying_key, peer.hash)
            .map_err(|e| KeyError::Corrupt(e.to_string()))
    }
}

fn verify_against_peer(
    peer: &PeerRecord,
    message: &[u8],
    proof: &crate::types::Proof,
    complexity: u8,
) -> Result<(), KeyError> {
    use crate::crypto::{CryptoError, check_complexity, verify};

    let result: Result<(), CryptoError> = match proof {
        crate::types::Proof::Trust { signature } => {
            let digest = hash_bytes(peer.hash, message);
            let digest32: [u8; 32] = digest
                .try_into()
                .map_err(|_| CryptoError::MalformedKey("digest is not 32 bytes".into()))?;
            let sig = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, signature)
                .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            verify(&peer.verifying_key, &digest32, &sig)
        }
        crate::types::Proof::Work { digest, nonce } => {
            let expected =
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, digest)
                    .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            let mut bytes = message.to_vec();
            bytes.extend_from_slice(&nonce.to_be_bytes());
            let actual = hash_bytes(peer.hash, &bytes);
            if actual != expected || !check_complexity(&actual, complexity) {
                Err(CryptoError::BadSignature)
            } else {
                Ok(())
            }
        }
    };

    result.map_err(|e| KeyError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{SigningKey, SupportedEncryption};
    use crate::matchmaking::fake::InMemoryMatchmakingClient;
    use crate::matchmaking::MatchmakingClient as _;

    fn registration_for(dc_id: &str, key: &SigningKey) -> Registration {
        Registration {
            dc_id: dc_id.to_string(),
            level: 2,
            url: "https://peer.example".into(),
            scheme: SupportedEncryption::Secp256k1,
            hash: SupportedHash::Sha256,
            public_key: hex::encode(key.public_key().to_sec1_bytes()),
            version: "1.0.0".into(),
            region: None,
            cloud: None,
            wallet: None,
            funded: None,
        }
    }

    #[tokio::test]
    async fn unresolvable_chain_yields_not_found_not_a_generic_error() {
        let client: Arc<dyn MatchmakingClient> = Arc::new(InMemoryMatchmakingClient::default());
        let resolver = PeerKeyResolver::new(client);
        let result = resolver.resolve("ghost-chain").await;
        assert!(matches!(result, Err(KeyError::NotFound(_))));
    }

    #[tokio::test]
    async fn resolved_peer_caches_across_calls() {
        let mm = Arc::new(InMemoryMatchmakingClient::default());
        let key = SigningKey::generate();
        mm.register(&registration_for("chain-a", &key)).await.unwrap();
        let client: Arc<dyn MatchmakingClient> = mm;
        let resolver = PeerKeyResolver::new(client);

        let first = resolver.resolve("chain-a").await.unwrap();
        resolver.invalidate("chain-a");
        let second = resolver.resolve("chain-a").await.unwrap();
        assert_eq!(first.dc_id, second.dc_id);
    }
}
