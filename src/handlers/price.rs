use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    models::{
        common::ErrorResponse,
        price::{PriceQuery, PriceResponse},
    },
    services::price_oracle::PriceError,
    AppState,
};

/// Handler for GET /price?token=<address>
/// Proxies the upstream price feed through the cached oracle adapter.
pub async fn get_price(
    State(state): State<AppState>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let token = query.token.filter(|t| !t.is_empty()).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "token query param missing".to_string(),
            }),
        )
    })?;

    match state.price_oracle.get_price(&token).await {
        Ok(price) => Ok(Json(PriceResponse {
            price: price.to_string(),
        })),
        Err(PriceError::PriceNotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no price for token".to_string(),
            }),
        )),
        Err(e @ PriceError::UpstreamUnavailable(_)) => {
            tracing::error!(token = %token, error = %e, "Price proxy failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "upstream error".to_string(),
                }),
            ))
        }
    }
}
