//! secp256k1 signing/verification and public-id derivation (C1/C2).

use secp256k1::ecdsa::Signature as Secp256k1Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use super::CryptoError;

/// Local signing keypair for a chain.
///
/// Wraps a secp256k1 secret key; the matching public key and base58
/// `dc_id` are derived lazily so the struct stays cheap to clone-by-reference.
#[derive(Clone)]
pub struct SigningKey {
    secret: SecretKey,
}

impl SigningKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self { secret })
    }

    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, _) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        Self { secret }
    }

    pub fn public_key(&self) -> VerifyingKey {
        let secp = Secp256k1::new();
        VerifyingKey {
            public: PublicKey::from_secret_key(&secp, &self.secret),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }
}

/// Peer (or own) public key, used to verify proofs under the `trust` scheme.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VerifyingKey {
    public: PublicKey,
}

impl VerifyingKey {
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let public =
            PublicKey::from_slice(bytes).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self { public })
    }

    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.public.serialize().to_vec()
    }
}

/// Signs a 32-byte digest with `key`, returning a compact-serialised signature.
///
/// Callers are responsible for hashing the canonical message down to 32
/// bytes with the chain's configured [`super::SupportedHash`] before
/// calling this function; secp256k1 ECDSA always signs a fixed-size digest.
pub fn sign(key: &SigningKey, digest32: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let secp = Secp256k1::new();
    let message =
        Message::from_digest_slice(digest32).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let sig = secp.sign_ecdsa(&message, &key.secret);
    Ok(sig.serialize_compact().to_vec())
}

/// Verifies `signature` over `digest32` against `key`.
pub fn verify(key: &VerifyingKey, digest32: &[u8; 32], signature: &[u8]) -> Result<(), CryptoError> {
    let secp = Secp256k1::new();
    let message =
        Message::from_digest_slice(digest32).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let sig = Secp256k1Signature::from_compact(signature)
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    secp.verify_ecdsa(&message, &sig, &key.public)
        .map_err(|_| CryptoError::BadSignature)
}

/// Derives a chain's permanent `dc_id` as the base58-encoded serialised
/// public key, per §4.1's "Public id" definition.
pub fn calculate_public_id(key: &VerifyingKey) -> String {
    bs58::encode(key.public.serialize()).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = SigningKey::generate();
        let digest = [7u8; 32];
        let sig = sign(&key, &digest).unwrap();
        assert!(verify(&key.public_key(), &digest, &sig).is_ok());
    }

    #[test]
    fn flipping_a_bit_of_the_digest_invalidates_the_signature() {
        let key = SigningKey::generate();
        let digest = [3u8; 32];
        let sig = sign(&key, &digest).unwrap();
        let mut tampered = digest;
        tampered[0] ^= 0x01;
        assert!(verify(&key.public_key(), &tampered, &sig).is_err());
    }

    #[test]
    fn public_id_is_stable_base58_of_serialized_key() {
        let key = SigningKey::generate();
        let id_a = calculate_public_id(&key.public_key());
        let id_b = calculate_public_id(&key.public_key());
        assert_eq!(id_a, id_b);
        assert!(bs58::decode(&id_a).into_vec().is_ok());
    }
}
