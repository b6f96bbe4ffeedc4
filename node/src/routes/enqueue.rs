use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::auth_guard::require_auth;
use crate::state::SharedState;

const PATH: &str = "/v1/enqueue";

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub status: &'static str,
}

/// `POST /v1/enqueue`
///
/// Accepts one item of work for this node's level: a `Transaction` at L1,
/// or the broadcast item shape the level above produced otherwise (§4.9).
pub async fn enqueue(
    State(state): State<SharedState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<EnqueueResponse>), (StatusCode, String)> {
    require_auth(&state, &method, PATH, &headers, &body)?;

    state
        .runtime
        .enqueue_json(&body)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed enqueue body: {e}")))?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { status: "queued" })))
}
