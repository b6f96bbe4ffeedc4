//! HTTP-backed [`MatchmakingClient`], talking to the external matchmaking
//! service over DC1-HMAC-authenticated requests (§4.4, §4.5).
//!
//! Unlike the blocking `reqwest` client the rest of this codebase's HTTP
//! surface historically used, matchmaking calls happen from inside async
//! executor ticks and the broadcast loop, so this client is built on async
//! `reqwest` throughout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ClaimCheckDiff, MatchmakingClient, MatchmakingError};
use crate::auth::RequestSigner;
use crate::types::{ClaimCheck, LevelRequirement, Registration};

pub struct HttpMatchmakingClient {
    base_url: String,
    client: Client,
    signer: Arc<RequestSigner>,
}

impl HttpMatchmakingClient {
    pub fn new(base_url: impl Into<String>, signer: Arc<RequestSigner>, timeout: Duration) -> Result<Self, MatchmakingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MatchmakingError::Transport(e.to_string()))?;
        Ok(Self { base_url: base_url.into(), client, signer })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn signed_request<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<R, MatchmakingError> {
        let url = self.endpoint(path);
        let body_bytes = serde_json::to_vec(body).map_err(|e| MatchmakingError::Transport(e.to_string()))?;
        let headers = self
            .signer
            .sign_request(method.as_str(), path, "application/json", &body_bytes)
            .await
            .map_err(|e| MatchmakingError::Transport(e.to_string()))?;

        let mut request = self.client.request(method, &url).body(body_bytes);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MatchmakingError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = response.text().await.unwrap_or_default();
            return Err(MatchmakingError::from_status(status, body_text));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| MatchmakingError::Transport(format!("malformed response body: {e}")))
    }
}

#[derive(Serialize)]
struct CreateClaimCheckRequest<'a> {
    block_id: &'a str,
    requirements: &'a [LevelRequirement],
}

#[derive(Serialize)]
struct AddReceiptRequest<'a> {
    level: u8,
    dc_id: &'a str,
    block_id: &'a str,
    signature: &'a str,
}

#[async_trait]
impl MatchmakingClient for HttpMatchmakingClient {
    async fn register(&self, registration: &Registration) -> Result<(), MatchmakingError> {
        let _: serde_json::Value = self
            .signed_request(reqwest::Method::POST, "/registration", registration)
            .await?;
        Ok(())
    }

    async fn get_registration(&self, dc_id: &str) -> Result<Registration, MatchmakingError> {
        self.signed_request(
            reqwest::Method::GET,
            &format!("/registration/{dc_id}"),
            &serde_json::Value::Null,
        )
        .await
    }

    async fn create_claim_check(
        &self,
        block_id: &str,
        requirements: &[LevelRequirement],
    ) -> Result<ClaimCheck, MatchmakingError> {
        self.signed_request(
            reqwest::Method::POST,
            "/claim-check",
            &CreateClaimCheckRequest { block_id, requirements },
        )
        .await
    }

    async fn get_claim_check(&self, block_id: &str) -> Result<ClaimCheck, MatchmakingError> {
        self.signed_request(
            reqwest::Method::GET,
            &format!("/claim-check/{block_id}"),
            &serde_json::Value::Null,
        )
        .await
    }

    async fn update_claim_check(
        &self,
        block_id: &str,
        diff: ClaimCheckDiff,
    ) -> Result<ClaimCheck, MatchmakingError> {
        #[derive(Serialize)]
        #[serde(tag = "kind")]
        enum WireDiff {
            ReplaceNonResponder { level: u8, stale_dc_id: String },
        }
        let wire = match diff {
            ClaimCheckDiff::ReplaceNonResponder { level, stale_dc_id } => {
                WireDiff::ReplaceNonResponder { level, stale_dc_id }
            }
        };
        self.signed_request(
            reqwest::Method::PATCH,
            &format!("/claim-check/{block_id}"),
            &wire,
        )
        .await
    }

    async fn resolve_claim_check(&self, claim_check_id: &str) -> Result<(), MatchmakingError> {
        let _: serde_json::Value = self
            .signed_request(
                reqwest::Method::POST,
                &format!("/claim-check/{claim_check_id}/resolve"),
                &serde_json::Value::Null,
            )
            .await?;
        Ok(())
    }

    async fn add_receipt(
        &self,
        block_id: &str,
        level: u8,
        dc_id: &str,
        block_id_at_level: &str,
        signature: &str,
    ) -> Result<ClaimCheck, MatchmakingError> {
        self.signed_request(
            reqwest::Method::POST,
            &format!("/claim-check/{block_id}/receipt"),
            &AddReceiptRequest { level, dc_id, block_id: block_id_at_level, signature },
        )
        .await
    }
}
