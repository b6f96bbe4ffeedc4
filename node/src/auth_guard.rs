//! Shared DC1-HMAC verification for inbound inter-chain requests.

use axum::http::{HeaderMap, Method, StatusCode};

use crate::state::SharedState;

/// Runs [`chain::AuthVerifier::verify_request`] against one request,
/// translating failure into the `(StatusCode, String)` shape every route
/// handler returns on error.
pub fn require_auth(
    state: &SharedState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String, (StatusCode, String)> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default();

    state
        .auth
        .verify_request(
            method.as_str(),
            path,
            header("authorization"),
            header("timestamp"),
            header("dragonchain"),
            header("content-type"),
            body,
        )
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))
}
