//! Own-keypair loading and per-chain public-key resolution (C2).
//!
//! Per the design note in §9 ("global objects"), the only genuinely
//! process-wide state this crate allows is the local chain's own keypair,
//! loaded once from a [`SecretStore`] at startup. Everything else —
//! including peer key material — is an explicit dependency threaded
//! through executors.

mod resolver;
mod secret_store;

pub use resolver::{PeerKeyResolver, PeerRecord};
pub use secret_store::{FileSecretStore, InMemorySecretStore, SecretStore};

use crate::crypto::{SigningKey, VerifyingKey, calculate_public_id};

/// The local chain's identity: its keypair and the `dc_id` derived from it.
#[derive(Clone)]
pub struct LocalKeypair {
    signing: SigningKey,
    dc_id: String,
}

impl LocalKeypair {
    /// Loads the local keypair from `store`, generating and persisting a
    /// fresh one if none exists yet.
    pub fn load_or_generate(store: &dyn SecretStore) -> Result<Self, KeyError> {
        let signing = match store.load_signing_key()? {
            Some(bytes) => {
                SigningKey::from_bytes(&bytes).map_err(|e| KeyError::Corrupt(e.to_string()))?
            }
            None => {
                let fresh = SigningKey::generate();
                store.store_signing_key(&fresh.secret_bytes())?;
                fresh
            }
        };
        let dc_id = calculate_public_id(&signing.public_key());
        Ok(Self { signing, dc_id })
    }

    pub fn dc_id(&self) -> &str {
        &self.dc_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.public_key()
    }
}

/// Errors raised while loading local keys or resolving peer keys.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The remote chain has no registration on file with matchmaking.
    ///
    /// Per §4.2, callers must treat this as "drop the block from
    /// processing", never as "the block is invalid".
    #[error("chain {0} is not registered with matchmaking")]
    NotFound(String),
    #[error("secret store error: {0}")]
    Store(String),
    #[error("corrupt key material: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_generate_persists_and_reloads_the_same_identity() {
        let store = InMemorySecretStore::default();
        let first = LocalKeypair::load_or_generate(&store).unwrap();
        let second = LocalKeypair::load_or_generate(&store).unwrap();
        assert_eq!(first.dc_id(), second.dc_id());
    }
}
