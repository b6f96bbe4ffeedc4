//! DC1-HMAC authorization (C6): shared-key bootstrap, request signing, and
//! the receiving-side checks (skew, replay, rate limit) from §4.5.

mod verify;

pub use verify::{AuthVerifier, RateLimiter, ReplayGuard};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::crypto::{SigningKey, SupportedHash, calculate_public_id, create_hmac, hash_bytes, sign, verify};
use crate::keys::{KeyError, PeerKeyResolver};

const SHARED_KEY_LEN: usize = 43;

/// A shared HMAC key established with one remote party, identified by the
/// sending chain's `dc_id` (the `keyId` carried in the `Authorization`
/// header).
#[derive(Clone, Debug)]
pub struct SharedKey {
    pub key_id: String,
    pub secret: Vec<u8>,
}

/// Where established shared keys live. Production persistence is out of
/// scope (§1); this only needs a place to cache what bootstrap produced.
pub trait SharedKeyStore: Send + Sync {
    fn get(&self, target_dc_id: &str) -> Option<SharedKey>;
    fn put(&self, target_dc_id: &str, key: SharedKey);
}

#[derive(Default)]
pub struct InMemorySharedKeyStore {
    keys: Mutex<HashMap<String, SharedKey>>,
}

impl SharedKeyStore for InMemorySharedKeyStore {
    fn get(&self, target_dc_id: &str) -> Option<SharedKey> {
        self.keys.lock().expect("lock poisoned").get(target_dc_id).cloned()
    }

    fn put(&self, target_dc_id: &str, key: SharedKey) {
        self.keys.lock().expect("lock poisoned").insert(target_dc_id.to_string(), key);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limit exceeded for this key")]
    RateLimited,
    #[error("action forbidden: root-only endpoint")]
    Forbidden,
    #[error("transport error establishing shared key: {0}")]
    Transport(String),
}

#[derive(Serialize)]
struct AuthRegisterRequest<'a> {
    dcid: &'a str,
    key: &'a str,
    signature: &'a str,
}

#[derive(Deserialize)]
struct AuthRegisterResponse {
    #[allow(dead_code)]
    ok: bool,
}

/// Signs outgoing requests to one fixed `target_dc_id`, bootstrapping a
/// shared key against `register_url` the first time it's needed (§4.5,
/// sending side).
pub struct RequestSigner {
    own_dc_id: String,
    signing_key: SigningKey,
    hash: SupportedHash,
    target_dc_id: String,
    register_url: String,
    http: Client,
    keys: std::sync::Arc<dyn SharedKeyStore>,
}

impl RequestSigner {
    pub fn new(
        own_dc_id: String,
        signing_key: SigningKey,
        hash: SupportedHash,
        target_dc_id: String,
        register_url: String,
        keys: std::sync::Arc<dyn SharedKeyStore>,
    ) -> Self {
        Self {
            own_dc_id,
            signing_key,
            hash,
            target_dc_id,
            register_url,
            http: Client::new(),
            keys,
        }
    }

    async fn ensure_shared_key(&self) -> Result<SharedKey, AuthError> {
        if let Some(key) = self.keys.get(&self.target_dc_id) {
            return Ok(key);
        }

        let raw_key: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(SHARED_KEY_LEN)
            .map(char::from)
            .collect();

        let message = format!("{}_{}", self.target_dc_id, raw_key);
        let digest = hash_bytes(self.hash, message.as_bytes());
        let digest32: [u8; 32] = digest
            .try_into()
            .map_err(|_| AuthError::Transport("hash did not produce a 32-byte digest".into()))?;
        let signature = sign(&self.signing_key, &digest32).map_err(|e| AuthError::Transport(e.to_string()))?;

        let response = self
            .http
            .post(&self.register_url)
            .json(&AuthRegisterRequest {
                dcid: &self.own_dc_id,
                key: &raw_key,
                signature: &BASE64.encode(signature),
            })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Transport(format!(
                "auth-register returned {}",
                response.status()
            )));
        }
        let _: AuthRegisterResponse =
            response.json().await.map_err(|e| AuthError::Transport(e.to_string()))?;

        let shared = SharedKey { key_id: self.own_dc_id.clone(), secret: raw_key.into_bytes() };
        self.keys.put(&self.target_dc_id, shared.clone());
        Ok(shared)
    }

    /// Produces the `Authorization`, `timestamp`, `dragonchain` headers for
    /// one request, per §4.5's signature message format.
    pub async fn sign_request(
        &self,
        method: &str,
        full_path: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<Vec<(String, String)>, AuthError> {
        let shared = self.ensure_shared_key().await?;
        let timestamp = current_unix_timestamp().to_string();
        let body_hash = BASE64.encode(hash_bytes(self.hash, body));
        let message = format!(
            "{method}\n{full_path}\n{}\n{timestamp}\n{content_type}\n{body_hash}",
            self.own_dc_id
        );
        let hmac = create_hmac(self.hash, &shared.secret, message.as_bytes());

        Ok(vec![
            (
                "Authorization".to_string(),
                format!(
                    "DC1-HMAC-{} {}:{}",
                    self.hash.as_str().to_uppercase(),
                    shared.key_id,
                    BASE64.encode(hmac)
                ),
            ),
            ("timestamp".to_string(), timestamp),
            ("dragonchain".to_string(), self.own_dc_id.clone()),
        ])
    }
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

/// Wire body of an incoming `/v1/interchain-auth-register` bootstrap
/// request, the receiving-side counterpart of [`RequestSigner::sign_request`]'s
/// first call (§4.5). The sender is proposing `key` as the shared secret
/// for future requests it sends us, authenticated by signing
/// `"{our_dc_id}_{key}"` with its registered verifying key.
#[derive(Deserialize)]
pub struct IncomingAuthRegister {
    pub dcid: String,
    pub key: String,
    pub signature: String,
}

/// Verifies an incoming bootstrap request and, on success, stores the
/// proposed key so subsequent requests from `dcid` can be HMAC-verified.
///
/// Returns the sender's `dc_id` on success, mirroring [`AuthVerifier::verify_request`].
pub async fn handle_auth_register(
    own_dc_id: &str,
    hash: SupportedHash,
    resolver: &PeerKeyResolver,
    keys: &dyn SharedKeyStore,
    request: &IncomingAuthRegister,
) -> Result<String, AuthError> {
    let message = format!("{own_dc_id}_{}", request.key);
    let digest = hash_bytes(hash, message.as_bytes());
    let digest32: [u8; 32] = digest
        .try_into()
        .map_err(|_| AuthError::Unauthorized("hash did not produce a 32-byte digest".into()))?;
    let signature = BASE64
        .decode(&request.signature)
        .map_err(|e| AuthError::Unauthorized(format!("malformed signature: {e}")))?;

    let peer = resolver.resolve(&request.dcid).await.map_err(|e| match e {
        KeyError::NotFound(dc_id) => AuthError::Unauthorized(format!("unregistered chain: {dc_id}")),
        other => AuthError::Unauthorized(other.to_string()),
    })?;
    verify(&peer.verifying_key, &digest32, &signature)
        .map_err(|_| AuthError::Unauthorized("bad auth-register signature".into()))?;

    keys.put(
        &request.dcid,
        SharedKey { key_id: request.dcid.clone(), secret: request.key.clone().into_bytes() },
    );
    Ok(request.dcid.clone())
}

/// Derives the local chain's permanent id from its own keypair, matching
/// how every other component obtains `dc_id` (§4.1's "Public id").
pub fn own_dc_id(signing_key: &SigningKey) -> String {
    calculate_public_id(&signing_key.public_key())
}
