use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use chain::ReceiptRequest;

use crate::auth_guard::require_auth;
use crate::state::SharedState;

const PATH: &str = "/v1/receipt";

/// Wire body for `POST /v1/receipt` (§6); [`chain::ReceiptRequest`] itself
/// doesn't derive `Deserialize` since production code only ever builds one
/// from an already-parsed request.
#[derive(Deserialize)]
pub struct ReceiptBody {
    pub l1_block_id: String,
    pub level: u8,
    pub sender_dc_id: String,
    pub sender_block_id: u64,
    pub signature: String,
}

#[derive(Serialize)]
pub struct ReceiptResponse {
    pub status: &'static str,
}

/// `POST /v1/receipt`
pub async fn receipt(
    State(state): State<SharedState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ReceiptResponse>), (StatusCode, String)> {
    require_auth(&state, &method, PATH, &headers, &body)?;

    let parsed: ReceiptBody =
        serde_json::from_slice(&body).map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed receipt body: {e}")))?;

    state
        .receipts
        .handle(ReceiptRequest {
            l1_block_id: parsed.l1_block_id,
            level: parsed.level,
            sender_dc_id: parsed.sender_dc_id,
            sender_block_id: parsed.sender_block_id,
            signature: parsed.signature,
        })
        .await
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    Ok((StatusCode::OK, Json(ReceiptResponse { status: "recorded" })))
}
