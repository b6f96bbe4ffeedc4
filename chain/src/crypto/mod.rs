//! Cryptographic primitives shared by every level executor (C1).
//!
//! This module concentrates every byte-level decision the rest of the
//! crate depends on: which hash function backs a chain, how HMACs are
//! constructed and compared, how proof-of-work is searched for, and how
//! secp256k1 signatures are produced and checked. Canonical encodings for
//! transactions and blocks live in [`crate::types`], which calls back into
//! [`hash_bytes`] and [`sign`]/[`verify`] here.

mod hmac_util;
mod pow;
mod sign;

pub use hmac_util::{compare_hmac, create_hmac};
pub use pow::{check_complexity, search_pow};
pub use sign::{SigningKey, VerifyingKey, calculate_public_id, sign, verify};

use serde::{Deserialize, Serialize};
use sha2::Digest;

/// A hash algorithm selectable per chain, advertised at registration time.
///
/// Chains must agree out of band (via matchmaking registration records) on
/// which hash a peer uses; there is no in-band negotiation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportedHash {
    Blake2b,
    Sha256,
    Sha3_256,
}

impl SupportedHash {
    /// Parses the wire/env representation (`"blake2b"`, `"sha256"`, `"sha3_256"`).
    pub fn parse(raw: &str) -> Result<Self, CryptoError> {
        match raw {
            "blake2b" => Ok(SupportedHash::Blake2b),
            "sha256" => Ok(SupportedHash::Sha256),
            "sha3_256" => Ok(SupportedHash::Sha3_256),
            other => Err(CryptoError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedHash::Blake2b => "blake2b",
            SupportedHash::Sha256 => "sha256",
            SupportedHash::Sha3_256 => "sha3_256",
        }
    }
}

/// The only signature scheme currently supported.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportedEncryption {
    Secp256k1,
}

/// Unsupported-scheme and other primitive-level failures.
///
/// Per §4.1, an unsupported scheme is a non-retryable programmer/config
/// error, not a transient failure.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unsupported hash or encryption scheme: {0}")]
    UnsupportedScheme(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("malformed key material: {0}")]
    MalformedKey(String),
}

/// Hashes `data` with the chain-selected hash algorithm, returning the raw digest.
///
/// blake2b is used in its 256-bit (32-byte) output configuration to keep
/// digest length uniform across the three supported algorithms.
pub fn hash_bytes(hash: SupportedHash, data: &[u8]) -> Vec<u8> {
    match hash {
        SupportedHash::Blake2b => {
            use blake2::Blake2bVar;
            use blake2::digest::{Update, VariableOutput};
            let mut hasher = Blake2bVar::new(32).expect("32 is a valid blake2b output size");
            hasher.update(data);
            let mut out = vec![0u8; 32];
            hasher.finalize_variable(&mut out).expect("fixed-size output buffer");
            out
        }
        SupportedHash::Sha256 => sha2::Sha256::digest(data).to_vec(),
        SupportedHash::Sha3_256 => {
            use sha3::{Digest as Sha3Digest, Sha3_256};
            Sha3_256::digest(data).to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_known_names() {
        for name in ["blake2b", "sha256", "sha3_256"] {
            let parsed = SupportedHash::parse(name).unwrap();
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn parse_rejects_unknown_scheme() {
        assert!(SupportedHash::parse("md5").is_err());
    }

    #[test]
    fn hash_bytes_is_deterministic_and_32_bytes_for_every_scheme() {
        for hash in [SupportedHash::Blake2b, SupportedHash::Sha256, SupportedHash::Sha3_256] {
            let a = hash_bytes(hash, b"dragon net");
            let b = hash_bytes(hash, b"dragon net");
            assert_eq!(a, b);
            assert_eq!(a.len(), 32);
        }
    }

    #[test]
    fn different_schemes_disagree_on_digest() {
        let sha = hash_bytes(SupportedHash::Sha256, b"x");
        let sha3 = hash_bytes(SupportedHash::Sha3_256, b"x");
        let b2 = hash_bytes(SupportedHash::Blake2b, b"x");
        assert_ne!(sha, sha3);
        assert_ne!(sha, b2);
        assert_ne!(sha3, b2);
    }
}
