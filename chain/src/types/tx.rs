//! L1-only transaction model, and its canonical hashing (§3, §4.1).

use serde::{Deserialize, Serialize};

use crate::crypto::{SigningKey, VerifyingKey, hash_bytes, sign, verify};
use crate::crypto::{CryptoError, SupportedHash};

/// Reserved prefix for system transaction types; user-submitted `txn_type`
/// values starting with this prefix are rejected at L1 enqueue.
pub const SYSTEM_TXN_TYPE_PREFIX: &str = "-SYSTEM";

/// Full L1 transaction, including its opaque payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub txn_id: String,
    pub txn_type: String,
    pub dc_id: String,
    /// Assigned at fixation (§3); absent before a tick assigns it.
    pub block_id: Option<u64>,
    pub timestamp: String,
    pub tag: String,
    pub invoker: Option<String>,
    pub payload: Vec<u8>,
    pub full_hash: String,
    pub signature: String,
}

/// Stripped projection: identical to [`Transaction`] minus `payload`,
/// substituting `full_hash` in its place for hashing purposes (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrippedTransaction {
    pub txn_id: String,
    pub txn_type: String,
    pub dc_id: String,
    pub block_id: Option<u64>,
    pub timestamp: String,
    pub tag: String,
    pub invoker: Option<String>,
    pub full_hash: String,
    pub signature: String,
}

impl Transaction {
    pub fn strip(&self) -> StrippedTransaction {
        StrippedTransaction {
            txn_id: self.txn_id.clone(),
            txn_type: self.txn_type.clone(),
            dc_id: self.dc_id.clone(),
            block_id: self.block_id,
            timestamp: self.timestamp.clone(),
            tag: self.tag.clone(),
            invoker: self.invoker.clone(),
            full_hash: self.full_hash.clone(),
            signature: self.signature.clone(),
        }
    }

    /// Canonical header bytes shared by full and stripped hashing: the
    /// exact field order from §4.1 is `txn_id, txn_type, dc_id, block_id,
    /// tag, invoker, timestamp`.
    fn header_string(&self) -> String {
        header_string(
            &self.txn_id,
            &self.txn_type,
            &self.dc_id,
            self.block_id,
            &self.tag,
            self.invoker.as_deref(),
            &self.timestamp,
        )
    }

    /// `full_hash = hash(header || payload)`.
    pub fn compute_full_hash(&self, hash: SupportedHash) -> Vec<u8> {
        let mut bytes = self.header_string().into_bytes();
        bytes.extend_from_slice(&self.payload);
        hash_bytes(hash, &bytes)
    }

    /// `stripped_hash = hash(header || full_hash)` — same construction with
    /// `full_hash` substituted for the payload (§3).
    pub fn compute_stripped_hash(&self, hash: SupportedHash) -> Vec<u8> {
        let mut bytes = self.header_string().into_bytes();
        bytes.extend_from_slice(self.full_hash.as_bytes());
        hash_bytes(hash, &bytes)
    }

    /// Signs the stripped hash, filling in `full_hash`/`signature` in place.
    ///
    /// `full_hash` must already be set before calling this (it participates
    /// in the stripped hash), matching the original pipeline's "compute
    /// full_hash, then sign the stripped form" ordering.
    pub fn sign(&mut self, key: &SigningKey, hash: SupportedHash) -> Result<(), CryptoError> {
        let full = self.compute_full_hash(hash);
        self.full_hash = hex::encode(&full);
        let stripped = self.compute_stripped_hash(hash);
        let digest32 = to_digest32(&stripped)?;
        let sig = sign(key, &digest32)?;
        self.signature = hex::encode(sig);
        Ok(())
    }
}

impl StrippedTransaction {
    fn header_string(&self) -> String {
        header_string(
            &self.txn_id,
            &self.txn_type,
            &self.dc_id,
            self.block_id,
            &self.tag,
            self.invoker.as_deref(),
            &self.timestamp,
        )
    }

    pub fn compute_stripped_hash(&self, hash: SupportedHash) -> Vec<u8> {
        let mut bytes = self.header_string().into_bytes();
        bytes.extend_from_slice(self.full_hash.as_bytes());
        hash_bytes(hash, &bytes)
    }

    /// Property 2/3 (§8): verifying the stripped signature alone never
    /// requires the payload, so a tampered payload cannot invalidate it.
    pub fn verify_stripped(&self, key: &VerifyingKey, hash: SupportedHash) -> Result<(), CryptoError> {
        let digest32 = to_digest32(&self.compute_stripped_hash(hash))?;
        let sig = hex::decode(&self.signature).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        verify(key, &digest32, &sig)
    }
}

/// Property 3 (§8): full verification implies stripped verification, and is
/// strictly stronger because it additionally binds the payload via
/// `full_hash`.
pub fn verify_full_transaction(
    tx: &Transaction,
    key: &VerifyingKey,
    hash: SupportedHash,
) -> Result<(), CryptoError> {
    let expected_full = hex::encode(tx.compute_full_hash(hash));
    if expected_full != tx.full_hash {
        return Err(CryptoError::BadSignature);
    }
    tx.strip().verify_stripped(key, hash)
}

fn header_string(
    txn_id: &str,
    txn_type: &str,
    dc_id: &str,
    block_id: Option<u64>,
    tag: &str,
    invoker: Option<&str>,
    timestamp: &str,
) -> String {
    let mut s = String::new();
    s.push_str(txn_id);
    s.push_str(txn_type);
    s.push_str(dc_id);
    if let Some(id) = block_id {
        s.push_str(&id.to_string());
    }
    s.push_str(tag);
    if let Some(inv) = invoker {
        s.push_str(inv);
    }
    s.push_str(timestamp);
    s
}

fn to_digest32(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    if bytes.len() != 32 {
        return Err(CryptoError::MalformedKey(format!(
            "expected 32-byte digest, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKey;

    fn dummy_tx() -> Transaction {
        Transaction {
            txn_id: "txn-1".into(),
            txn_type: "transfer".into(),
            dc_id: "chain-a".into(),
            block_id: Some(42),
            timestamp: "1700000000".into(),
            tag: "".into(),
            invoker: None,
            payload: b"{\"amount\":5}".to_vec(),
            full_hash: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn sign_then_verify_full_and_stripped_succeed() {
        let key = SigningKey::generate();
        let mut tx = dummy_tx();
        tx.sign(&key, SupportedHash::Sha256).unwrap();

        verify_full_transaction(&tx, &key.public_key(), SupportedHash::Sha256).unwrap();
        tx.strip()
            .verify_stripped(&key.public_key(), SupportedHash::Sha256)
            .unwrap();
    }

    #[test]
    fn tampering_payload_breaks_full_but_not_stripped_verification() {
        let key = SigningKey::generate();
        let mut tx = dummy_tx();
        tx.sign(&key, SupportedHash::Sha256).unwrap();

        tx.payload = b"{\"amount\":9999}".to_vec();

        assert!(verify_full_transaction(&tx, &key.public_key(), SupportedHash::Sha256).is_err());
        tx.strip()
            .verify_stripped(&key.public_key(), SupportedHash::Sha256)
            .expect("stripped verification is payload-independent");
    }

    #[test]
    fn reserved_system_prefix_constant_matches_spec() {
        assert_eq!(SYSTEM_TXN_TYPE_PREFIX, "-SYSTEM");
    }
}
