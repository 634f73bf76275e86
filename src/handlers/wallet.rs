use alloy::primitives::Address;
use axum::{extract::State, http::StatusCode, Json};
use std::str::FromStr;

use crate::{
    models::{
        common::ErrorResponse,
        vault::{ConnectRequest, SessionResponse},
    },
    services::order_lifecycle::OrderPhase,
    AppState,
};

/// Handler for POST /wallet/connect
/// Starts (or resets) the wallet session and retargets the vault poller.
pub async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let address = Address::from_str(&request.address).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("invalid address: {}", request.address),
            }),
        )
    })?;

    state.sessions.connect(address);
    // Pick up the new wallet's balance without waiting for the next tick
    state.vault_poller.invalidate();

    Ok(Json(SessionResponse {
        connected: true,
        address: Some(address.to_string()),
        phase: OrderPhase::Idle,
    }))
}

/// Handler for POST /wallet/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Json<SessionResponse> {
    state.sessions.disconnect();
    state.vault_poller.invalidate();

    Json(SessionResponse {
        connected: false,
        address: None,
        phase: OrderPhase::Idle,
    })
}
