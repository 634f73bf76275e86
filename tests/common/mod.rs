use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use dca_vault_backend::handlers;
use dca_vault_backend::jobs::vault_state_sync::VaultPollerHandle;
use dca_vault_backend::services::fill_ledger::FillStore;
use dca_vault_backend::services::order_lifecycle::SessionManager;
use dca_vault_backend::services::price_oracle::PriceOracleService;
use dca_vault_backend::services::vault_actions::VaultGateway;
use dca_vault_backend::services::vault_reader::VaultSnapshot;
use dca_vault_backend::{AppState, TokenPair};

/// AppState against a fixed vault snapshot and an unroutable price feed
/// (price lookups fail fast; metrics fall back to explicit receipts).
pub fn test_state(
    snapshot: VaultSnapshot,
    gateway: Option<Arc<VaultGateway>>,
    sessions: Arc<SessionManager>,
) -> AppState {
    AppState {
        price_oracle: PriceOracleService::new(
            "test_api_key".to_string(),
            // Nothing listens here; connection refused immediately
            "http://127.0.0.1:9".to_string(),
            1,
            30,
        ),
        fills: Arc::new(FillStore::new()),
        sessions,
        vault_poller: VaultPollerHandle::fixed(snapshot),
        gateway,
        tokens: TokenPair {
            source: "0x4200000000000000000000000000000000000006".to_string(),
            dest: "0xa1b2c3d4e5f678901234567890abcdefabcdef12".to_string(),
        },
    }
}

/// The same routes the binary serves.
pub fn test_router(state: AppState) -> Router {
    Router::new()
        .route("/price", get(handlers::price::get_price))
        .route(
            "/fill",
            get(handlers::fill::get_fills).post(handlers::fill::post_fill),
        )
        .route("/vault", get(handlers::vault::get_vault_state))
        .route("/vault/deposit", post(handlers::vault::deposit))
        .route("/vault/order", post(handlers::vault::create_order))
        .route("/vault/order/cancel", post(handlers::vault::cancel_order))
        .route("/vault/withdraw", post(handlers::vault::withdraw))
        .route("/wallet/connect", post(handlers::wallet::connect))
        .route("/wallet/disconnect", post(handlers::wallet::disconnect))
        .with_state(state)
}
