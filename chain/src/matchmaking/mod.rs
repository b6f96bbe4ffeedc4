//! Matchmaking client (C5): registration lifecycle, claim-check CRUD, and
//! the error taxonomy matchmaking's HTTP surface maps onto (§4.4).

pub mod http;
#[cfg(test)]
pub mod fake;

pub use http::HttpMatchmakingClient;

use async_trait::async_trait;

use crate::types::{ClaimCheck, LevelRequirement, Registration};

/// Everything an executor or the broadcast processor needs from
/// matchmaking. A trait so tests can swap in [`fake::InMemoryMatchmakingClient`].
#[async_trait]
pub trait MatchmakingClient: Send + Sync {
    async fn register(&self, registration: &Registration) -> Result<(), MatchmakingError>;
    async fn get_registration(&self, dc_id: &str) -> Result<Registration, MatchmakingError>;
    async fn create_claim_check(
        &self,
        block_id: &str,
        requirements: &[LevelRequirement],
    ) -> Result<ClaimCheck, MatchmakingError>;
    async fn get_claim_check(&self, block_id: &str) -> Result<ClaimCheck, MatchmakingError>;
    async fn update_claim_check(
        &self,
        block_id: &str,
        diff: ClaimCheckDiff,
    ) -> Result<ClaimCheck, MatchmakingError>;
    async fn resolve_claim_check(&self, claim_check_id: &str) -> Result<(), MatchmakingError>;
    async fn add_receipt(
        &self,
        block_id: &str,
        level: u8,
        dc_id: &str,
        block_id_at_level: &str,
        signature: &str,
    ) -> Result<ClaimCheck, MatchmakingError>;

    /// Read-through with fallback create, used by the broadcast processor
    /// when scheduling a block for the first time (§4.8, step 2).
    async fn get_or_create_claim_check(
        &self,
        block_id: &str,
        requirements: &[LevelRequirement],
    ) -> Result<ClaimCheck, MatchmakingError> {
        match self.get_claim_check(block_id).await {
            Ok(claim) => Ok(claim),
            Err(MatchmakingError::NotFound) => self.create_claim_check(block_id, requirements).await,
            Err(e) => Err(e),
        }
    }

    /// Swaps a non-responding chain for a replacement at `level` (§4.8 step
    /// 3). `UnableToUpdate` propagates when matchmaking has no replacement.
    async fn overwrite_no_response_node(
        &self,
        block_id: &str,
        level: u8,
        stale_dc_id: &str,
    ) -> Result<ClaimCheck, MatchmakingError> {
        self.update_claim_check(
            block_id,
            ClaimCheckDiff::ReplaceNonResponder { level, stale_dc_id: stale_dc_id.to_string() },
        )
        .await
    }
}

/// A requested mutation to an existing claim check.
#[derive(Clone, Debug)]
pub enum ClaimCheckDiff {
    ReplaceNonResponder { level: u8, stale_dc_id: String },
}

/// Matchmaking's HTTP error taxonomy (§4.4), already classified so callers
/// don't need to inspect status codes themselves.
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    /// 401 — the shared HMAC key is unknown or expired; caller should
    /// re-register it and retry once.
    #[error("matchmaking rejected the HMAC key (401)")]
    Unauthorized,
    /// 403 — the chain itself isn't registered; caller should re-register
    /// and retry once.
    #[error("matchmaking does not recognise this chain (403)")]
    Forbidden,
    /// 402 — L5-only: insufficient funds to anchor.
    #[error("insufficient funds to anchor (402)")]
    InsufficientFunds,
    /// 404 — surfaced upward, never retried automatically.
    #[error("not found (404)")]
    NotFound,
    /// 409 — no suitable replacement chain was available.
    #[error("unable to update claim: no replacement chain available (409)")]
    UnableToUpdate,
    /// 5xx — transient; caller may retry with backoff.
    #[error("matchmaking server error: {0}")]
    Retryable(String),
    /// Anything below the HTTP layer (connection refused, timeout, TLS...).
    #[error("transport error talking to matchmaking: {0}")]
    Transport(String),
}

impl MatchmakingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchmakingError::Retryable(_) | MatchmakingError::Transport(_))
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 => MatchmakingError::Unauthorized,
            403 => MatchmakingError::Forbidden,
            402 => MatchmakingError::InsufficientFunds,
            404 => MatchmakingError::NotFound,
            409 => MatchmakingError::UnableToUpdate,
            500..=599 => MatchmakingError::Retryable(body.into()),
            other => MatchmakingError::Retryable(format!("unexpected status {other}: {}", body.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_classify_per_spec_taxonomy() {
        assert!(matches!(MatchmakingError::from_status(401, ""), MatchmakingError::Unauthorized));
        assert!(matches!(MatchmakingError::from_status(403, ""), MatchmakingError::Forbidden));
        assert!(matches!(MatchmakingError::from_status(402, ""), MatchmakingError::InsufficientFunds));
        assert!(matches!(MatchmakingError::from_status(404, ""), MatchmakingError::NotFound));
        assert!(matches!(MatchmakingError::from_status(409, ""), MatchmakingError::UnableToUpdate));
        assert!(MatchmakingError::from_status(503, "busy").is_retryable());
    }
}
