//! HMAC construction and constant-time comparison (part of C1 / C6).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sha3::Sha3_256;

use super::SupportedHash;

/// Computes `HMAC(hashType, secret, message)`, base64-encoding is left to callers.
///
/// blake2b-keyed HMAC is built from the `blake2` crate's own MAC
/// implementation rather than the generic `hmac` construction, since
/// blake2b already defines a keyed mode; sha256 and sha3-256 use the
/// standard `hmac` crate.
pub fn create_hmac(hash: SupportedHash, secret: &[u8], message: &[u8]) -> Vec<u8> {
    match hash {
        SupportedHash::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        SupportedHash::Sha3_256 => {
            let mut mac =
                Hmac::<Sha3_256>::new_from_slice(secret).expect("HMAC accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        SupportedHash::Blake2b => {
            use blake2::Blake2bMac512;
            use blake2::digest::{FixedOutput, KeyInit, Update};
            // Blake2bMac512 requires a fixed-size key buffer; secrets longer than
            // 64 bytes are pre-hashed the way the rest of the crate treats keys.
            let mut mac = <Blake2bMac512 as KeyInit>::new_from_slice(&key_material(secret))
                .expect("key material is clamped to the keyed-blake2b key size");
            Update::update(&mut mac, message);
            mac.finalize_fixed().to_vec()
        }
    }
}

fn key_material(secret: &[u8]) -> Vec<u8> {
    if secret.len() <= 64 {
        secret.to_vec()
    } else {
        super::hash_bytes(SupportedHash::Blake2b, secret)
    }
}

/// Constant-time comparison of two HMAC digests.
///
/// §4.1 requires constant-time comparison; a short-circuiting `==` on
/// `Vec<u8>` would leak timing information about how many leading bytes
/// matched.
pub fn compare_hmac(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic_per_hash() {
        for hash in [SupportedHash::Sha256, SupportedHash::Sha3_256, SupportedHash::Blake2b] {
            let a = create_hmac(hash, b"shared-secret", b"message");
            let b = create_hmac(hash, b"shared-secret", b"message");
            assert_eq!(a, b);
        }
    }

    #[test]
    fn hmac_changes_with_message_or_key() {
        let base = create_hmac(SupportedHash::Sha256, b"k", b"m");
        let diff_key = create_hmac(SupportedHash::Sha256, b"k2", b"m");
        let diff_msg = create_hmac(SupportedHash::Sha256, b"k", b"m2");
        assert_ne!(base, diff_key);
        assert_ne!(base, diff_msg);
    }

    #[test]
    fn compare_hmac_rejects_length_mismatch_and_accepts_equal() {
        assert!(compare_hmac(b"abc", b"abc"));
        assert!(!compare_hmac(b"abc", b"ab"));
        assert!(!compare_hmac(b"abc", b"abd"));
    }
}
