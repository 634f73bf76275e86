use axum::{extract::State, Json};

use crate::{
    models::fill::{FillRow, PostFillRequest},
    AppState,
};

/// Handler for GET /fill
/// Serves the bounded fill window, newest first, with synthesized row keys.
pub async fn get_fills(State(state): State<AppState>) -> Json<Vec<FillRow>> {
    Json(state.fills.rows())
}

/// Handler for POST /fill
/// Appends one record at the head of the window; pushed by the external
/// orchestrator notifier on each executed slice.
pub async fn post_fill(
    State(state): State<AppState>,
    Json(request): Json<PostFillRequest>,
) -> &'static str {
    let fill = request.into_fill();
    tracing::info!(id = %fill.id, amount = %fill.source_amount, "Fill recorded");
    state.fills.push(fill);
    "ok"
}
