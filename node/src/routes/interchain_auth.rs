use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use chain::{handle_auth_register, IncomingAuthRegister};

use crate::state::SharedState;

#[derive(Serialize)]
pub struct AuthRegisterResponse {
    pub ok: bool,
}

/// `POST /v1/interchain-auth-register`
///
/// Receiving side of the DC1-HMAC bootstrap handshake (§4.5): a peer
/// proposes a shared key, authenticated by a signature over our own
/// `dc_id` and its registered verifying key.
pub async fn register(
    State(state): State<SharedState>,
    Json(body): Json<IncomingAuthRegister>,
) -> Result<Json<AuthRegisterResponse>, (StatusCode, String)> {
    let own_dc_id = state.runtime.own_dc_id();
    handle_auth_register(&own_dc_id, state.hash, &state.resolver, state.keystore.as_ref(), &body)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

    Ok(Json(AuthRegisterResponse { ok: true }))
}
