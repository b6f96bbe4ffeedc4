//! Receiving-side DC1-HMAC verification: signature check, clock skew,
//! replay rejection, and per-key rate limiting (§4.5).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::{AuthError, SharedKeyStore};
use crate::crypto::{SupportedHash, compare_hmac, create_hmac, hash_bytes};

const CLOCK_SKEW_SECS: i64 = 600;
const REPLAY_WINDOW_SECS: u64 = 60;
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Tracks `(keyId, hmac)` pairs seen in the last [`REPLAY_WINDOW_SECS`].
#[derive(Default)]
pub struct ReplayGuard {
    seen: Mutex<HashMap<(String, String), u64>>,
}

impl ReplayGuard {
    /// Returns `true` if `(key_id, hmac_b64)` is new at `now`, recording it.
    /// Stale entries are swept opportunistically on every call.
    fn observe(&self, key_id: &str, hmac_b64: &str, now: u64) -> bool {
        let mut seen = self.seen.lock().expect("lock poisoned");
        seen.retain(|_, seen_at| now.saturating_sub(*seen_at) < REPLAY_WINDOW_SECS);
        let id = (key_id.to_string(), hmac_b64.to_string());
        if seen.contains_key(&id) {
            return false;
        }
        seen.insert(id, now);
        true
    }
}

/// Sliding 60-second request-count limiter, one bounded timestamp queue per
/// `keyId`.
pub struct RateLimiter {
    limit: usize,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl RateLimiter {
    pub fn new(limit: usize) -> Self {
        Self { limit, windows: Mutex::new(HashMap::new()) }
    }

    fn allow(&self, key_id: &str, now: u64) -> bool {
        let mut windows = self.windows.lock().expect("lock poisoned");
        let queue = windows.entry(key_id.to_string()).or_default();
        while let Some(&front) = queue.front() {
            if now.saturating_sub(front) >= RATE_LIMIT_WINDOW_SECS {
                queue.pop_front();
            } else {
                break;
            }
        }
        if queue.len() >= self.limit {
            return false;
        }
        queue.push_back(now);
        true
    }
}

/// Verifies inbound DC1-HMAC requests against a store of shared keys,
/// indexed by `keyId` (the sender's `dc_id`).
pub struct AuthVerifier {
    hash: SupportedHash,
    keys: std::sync::Arc<dyn SharedKeyStore>,
    replay: ReplayGuard,
    rate_limiter: RateLimiter,
}

impl AuthVerifier {
    pub fn new(hash: SupportedHash, keys: std::sync::Arc<dyn SharedKeyStore>, rate_limit: usize) -> Self {
        Self { hash, keys, replay: ReplayGuard::default(), rate_limiter: RateLimiter::new(rate_limit) }
    }

    /// Verifies one request, returning the sender's `dc_id` on success.
    ///
    /// `authorization` is the raw `Authorization` header value, `timestamp`
    /// the raw `timestamp` header, `dragonchain` the raw `dragonchain`
    /// header (the claimed sender id).
    pub fn verify_request(
        &self,
        method: &str,
        full_path: &str,
        authorization: &str,
        timestamp: &str,
        dragonchain: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<String, AuthError> {
        let (hash_name, key_id, hmac_b64) = parse_authorization(authorization)?;
        let hash = SupportedHash::parse(&hash_name.to_lowercase())
            .map_err(|_| AuthError::Unauthorized(format!("unsupported hash type {hash_name}")))?;
        if hash != self.hash {
            return Err(AuthError::Unauthorized("hash scheme mismatch".into()));
        }

        let now = current_unix_timestamp();
        let claimed_ts: i64 = timestamp
            .parse()
            .map_err(|_| AuthError::Unauthorized("malformed timestamp header".into()))?;
        if (now as i64 - claimed_ts).abs() > CLOCK_SKEW_SECS {
            return Err(AuthError::Unauthorized("timestamp outside allowed clock skew".into()));
        }

        if !self.replay.observe(&key_id, &hmac_b64, now) {
            return Err(AuthError::Unauthorized("replayed request".into()));
        }
        if !self.rate_limiter.allow(&key_id, now) {
            return Err(AuthError::RateLimited);
        }

        let shared = self
            .keys
            .get(dragonchain)
            .ok_or_else(|| AuthError::Unauthorized("unknown key id".into()))?;
        if shared.key_id != key_id {
            return Err(AuthError::Unauthorized("key id does not match registered sender".into()));
        }

        let body_hash = BASE64.encode(hash_bytes(self.hash, body));
        let message = format!("{method}\n{full_path}\n{dragonchain}\n{timestamp}\n{content_type}\n{body_hash}");
        let expected = create_hmac(self.hash, &shared.secret, message.as_bytes());
        let provided = BASE64
            .decode(&hmac_b64)
            .map_err(|_| AuthError::Unauthorized("malformed hmac encoding".into()))?;

        if !compare_hmac(&expected, &provided) {
            return Err(AuthError::Unauthorized("hmac mismatch".into()));
        }

        Ok(dragonchain.to_string())
    }
}

fn parse_authorization(header: &str) -> Result<(String, String, String), AuthError> {
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let rest = parts.next().ok_or_else(|| AuthError::Unauthorized("malformed Authorization header".into()))?;

    let hash_name = scheme
        .strip_prefix("DC1-HMAC-")
        .ok_or_else(|| AuthError::Unauthorized("unrecognised authorization scheme".into()))?
        .to_string();

    let (key_id, hmac_b64) = rest
        .split_once(':')
        .ok_or_else(|| AuthError::Unauthorized("malformed key id / hmac pair".into()))?;

    Ok((hash_name, key_id.to_string(), hmac_b64.to_string()))
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{InMemorySharedKeyStore, SharedKey};
    use std::sync::Arc;

    fn verifier_with_key(key_id: &str, secret: &[u8]) -> (AuthVerifier, String) {
        let store = Arc::new(InMemorySharedKeyStore::default());
        store.put(key_id, SharedKey { key_id: key_id.to_string(), secret: secret.to_vec() });
        (AuthVerifier::new(SupportedHash::Sha256, store, 10), key_id.to_string())
    }

    fn sign(hash: SupportedHash, secret: &[u8], message: &str) -> String {
        BASE64.encode(create_hmac(hash, secret, message.as_bytes()))
    }

    #[test]
    fn valid_request_verifies_and_returns_sender_id() {
        let (verifier, dc_id) = verifier_with_key("chain-a", b"supersecret");
        let now = current_unix_timestamp().to_string();
        let body_hash = BASE64.encode(hash_bytes(SupportedHash::Sha256, b"{}"));
        let message = format!("POST\n/v1/receipt\n{dc_id}\n{now}\napplication/json\n{body_hash}");
        let hmac = sign(SupportedHash::Sha256, b"supersecret", &message);
        let auth_header = format!("DC1-HMAC-SHA256 {dc_id}:{hmac}");

        let result = verifier.verify_request(
            "POST",
            "/v1/receipt",
            &auth_header,
            &now,
            &dc_id,
            "application/json",
            b"{}",
        );
        assert_eq!(result.unwrap(), dc_id);
    }

    #[test]
    fn replayed_request_is_rejected_on_second_attempt() {
        let (verifier, dc_id) = verifier_with_key("chain-a", b"supersecret");
        let now = current_unix_timestamp().to_string();
        let body_hash = BASE64.encode(hash_bytes(SupportedHash::Sha256, b"{}"));
        let message = format!("POST\n/v1/receipt\n{dc_id}\n{now}\napplication/json\n{body_hash}");
        let hmac = sign(SupportedHash::Sha256, b"supersecret", &message);
        let auth_header = format!("DC1-HMAC-SHA256 {dc_id}:{hmac}");

        verifier
            .verify_request("POST", "/v1/receipt", &auth_header, &now, &dc_id, "application/json", b"{}")
            .unwrap();
        let second = verifier.verify_request(
            "POST",
            "/v1/receipt",
            &auth_header,
            &now,
            &dc_id,
            "application/json",
            b"{}",
        );
        assert!(second.is_err());
    }

    #[test]
    fn stale_timestamp_outside_skew_window_is_rejected() {
        let (verifier, dc_id) = verifier_with_key("chain-a", b"supersecret");
        let stale = (current_unix_timestamp() as i64 - 10_000).to_string();
        let body_hash = BASE64.encode(hash_bytes(SupportedHash::Sha256, b"{}"));
        let message = format!("POST\n/v1/receipt\n{dc_id}\n{stale}\napplication/json\n{body_hash}");
        let hmac = sign(SupportedHash::Sha256, b"supersecret", &message);
        let auth_header = format!("DC1-HMAC-SHA256 {dc_id}:{hmac}");

        let result = verifier.verify_request(
            "POST",
            "/v1/receipt",
            &auth_header,
            &stale,
            &dc_id,
            "application/json",
            b"{}",
        );
        assert!(result.is_err());
    }

    #[test]
    fn rate_limiter_rejects_once_window_is_full() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.allow("k", 1000));
        assert!(limiter.allow("k", 1001));
        assert!(!limiter.allow("k", 1002));
    }
}
