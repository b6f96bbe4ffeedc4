use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use chain::{ClaimCheck, MatchmakingError};

use crate::state::SharedState;

/// `GET /v1/claim/{blockId}`
///
/// Read-only passthrough to matchmaking's claim check, for operators and
/// clients tracking a block's verification progress.
pub async fn claim(
    State(state): State<SharedState>,
    Path(block_id): Path<String>,
) -> Result<Json<ClaimCheck>, (StatusCode, String)> {
    state.matchmaking.get_claim_check(&block_id).await.map(Json).map_err(|e| match e {
        MatchmakingError::NotFound => (StatusCode::NOT_FOUND, "no claim for this block".to_string()),
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    })
}
