use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub level: u8,
    pub dc_id: String,
}

/// `GET /health`
pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            level: state.runtime.level(),
            dc_id: state.runtime.own_dc_id(),
        }),
    )
}
