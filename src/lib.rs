// src/lib.rs

use std::sync::Arc;

use jobs::vault_state_sync::VaultPollerHandle;
use services::fill_ledger::FillStore;
use services::order_lifecycle::SessionManager;
use services::price_oracle::PriceOracleService;
use services::vault_actions::VaultGateway;

/// Token addresses the derived metrics price against: the asset being spent
/// and the asset being accumulated.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub source: String,
    pub dest: String,
}

#[derive(Clone)]
pub struct AppState {
    pub price_oracle: PriceOracleService,
    pub fills: Arc<FillStore>,
    pub sessions: Arc<SessionManager>,
    pub vault_poller: VaultPollerHandle,
    /// Absent when no signer/RPC is configured; action endpoints then
    /// respond 503.
    pub gateway: Option<Arc<VaultGateway>>,
    pub tokens: TokenPair,
}

pub mod services {
    pub mod fill_ledger;
    pub mod metrics;
    pub mod order_lifecycle;
    pub mod price_oracle;
    pub mod vault_actions;
    pub mod vault_reader;
}

pub mod handlers;
pub mod jobs;
pub mod models;
