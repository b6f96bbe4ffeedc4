//! Public-chain anchor client (§4.7 L5 tick).
//!
//! Real Bitcoin/Ethereum RPC clients are out of scope (§1); L5 only needs
//! the three operations it calls through an interchain client, modeled as
//! a trait plus an in-memory fake for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum PublicChainError {
    #[error("public chain transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait PublicChainClient: Send + Sync {
    /// Publishes `digest` as the anchor for one L5 block, returning the
    /// public-chain transaction hash.
    async fn publish_l5_hash_to_public_network(&self, digest: &[u8]) -> Result<String, PublicChainError>;

    /// Whether `tx_hash` has reached the confirmation threshold.
    async fn is_transaction_confirmed(&self, tx_hash: &str) -> Result<bool, PublicChainError>;

    /// The current public-chain block height, used to stamp `block_last_sent_at`.
    async fn current_block_id(&self) -> Result<u64, PublicChainError>;

    /// Wallet balance in the public chain's base unit, used by
    /// `has_funds_for_transactions`.
    async fn get_balance(&self, wallet: &str) -> Result<u64, PublicChainError>;

    /// Current network fee for one anchor transaction, in the same base
    /// unit as `get_balance`. `has_funds_for_transactions` requires the
    /// balance to cover `TRANSACTION_BUFFER` multiples of this estimate
    /// before anchoring.
    async fn estimate_transaction_fee(&self) -> Result<u64, PublicChainError>;
}

/// In-memory fake: every publish is instantly "confirmed" the second time
/// it's checked, and the balance is fixed at construction.
pub struct FakePublicChainClient {
    balance: u64,
    block_id: Mutex<u64>,
    confirmed_after_first_check: Mutex<HashMap<String, bool>>,
}

impl FakePublicChainClient {
    pub fn new(balance: u64) -> Self {
        Self { balance, block_id: Mutex::new(1), confirmed_after_first_check: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl PublicChainClient for FakePublicChainClient {
    async fn publish_l5_hash_to_public_network(&self, digest: &[u8]) -> Result<String, PublicChainError> {
        Ok(hex::encode(digest))
    }

    async fn is_transaction_confirmed(&self, tx_hash: &str) -> Result<bool, PublicChainError> {
        let mut seen = self.confirmed_after_first_check.lock().expect("lock poisoned");
        let already_seen = seen.insert(tx_hash.to_string(), true).unwrap_or(false);
        Ok(already_seen)
    }

    async fn current_block_id(&self) -> Result<u64, PublicChainError> {
        let mut id = self.block_id.lock().expect("lock poisoned");
        *id += 1;
        Ok(*id)
    }

    async fn get_balance(&self, _wallet: &str) -> Result<u64, PublicChainError> {
        Ok(self.balance)
    }

    async fn estimate_transaction_fee(&self) -> Result<u64, PublicChainError> {
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_client_confirms_a_transaction_only_on_the_second_check() {
        let client = FakePublicChainClient::new(1_000_000);
        let hash = client.publish_l5_hash_to_public_network(b"digest").await.unwrap();
        assert!(!client.is_transaction_confirmed(&hash).await.unwrap());
        assert!(client.is_transaction_confirmed(&hash).await.unwrap());
    }
}
