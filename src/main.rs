use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::ProviderBuilder,
    signers::local::PrivateKeySigner,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dca_vault_backend::handlers;
use dca_vault_backend::jobs::{fill_history_sync, vault_state_sync};
use dca_vault_backend::services::fill_ledger::FillStore;
use dca_vault_backend::services::order_lifecycle::SessionManager;
use dca_vault_backend::services::price_oracle::PriceOracleService;
use dca_vault_backend::services::vault_actions::{RpcVaultTransport, VaultGateway};
use dca_vault_backend::services::vault_reader::RpcVaultReader;
use dca_vault_backend::{AppState, TokenPair};

/// Default upstream price feed.
const DEFAULT_PRICE_API_BASE: &str = "https://api.1inch.dev";

/// Main-net chain id: the price feed only covers main-net, local tokens are
/// remapped by the oracle adapter.
const DEFAULT_PRICE_CHAIN_ID: u64 = 1;

/// Freshness window for cached prices, in seconds.
const DEFAULT_PRICE_FRESH_SECS: u64 = 30;

/// Default source (spent) and destination (accumulated) tokens: WETH and
/// WBTC on Base Sepolia.
const DEFAULT_SOURCE_TOKEN: &str = "0x4200000000000000000000000000000000000006";
const DEFAULT_DEST_TOKEN: &str = "0xa1b2c3d4e5f678901234567890abcdefabcdef12";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dca_vault_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Price oracle adapter
    let price_api_key = env::var("PRICE_API_KEY").unwrap_or_else(|_| {
        tracing::warn!("PRICE_API_KEY not set - upstream price calls will be unauthorized");
        String::new()
    });
    let price_api_base =
        env::var("PRICE_API_BASE_URL").unwrap_or_else(|_| DEFAULT_PRICE_API_BASE.to_string());
    let price_chain_id: u64 = env::var("PRICE_CHAIN_ID")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PRICE_CHAIN_ID);
    let price_fresh_secs: u64 = env::var("PRICE_CACHE_FRESH_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PRICE_FRESH_SECS);

    let price_oracle =
        PriceOracleService::new(price_api_key, price_api_base, price_chain_id, price_fresh_secs);

    let fills = Arc::new(FillStore::new());
    let sessions = Arc::new(SessionManager::new());

    // Vault state poller; disabled without an RPC endpoint
    let vault_rpc_url = env::var("VAULT_RPC_URL").ok();
    let vault_address = env::var("VAULT_CONTRACT_ADDRESS").ok();

    let vault_poller = match (&vault_rpc_url, &vault_address) {
        (Some(rpc_url), Some(address)) => match RpcVaultReader::new(rpc_url, address) {
            Ok(reader) => vault_state_sync::start_vault_state_sync(Arc::new(reader), sessions.clone()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize vault reader, polling disabled");
                vault_state_sync::VaultPollerHandle::disabled()
            }
        },
        _ => {
            tracing::warn!(
                "VAULT_RPC_URL / VAULT_CONTRACT_ADDRESS not set - vault polling disabled"
            );
            vault_state_sync::VaultPollerHandle::disabled()
        }
    };

    // Action gateway; needs the RPC endpoint plus a signer key
    let gateway = build_gateway(
        vault_rpc_url.as_deref(),
        vault_address.as_deref(),
        sessions.clone(),
        vault_poller.clone(),
    );

    // Optional upstream fill-history sync
    fill_history_sync::start_fill_history_sync(fills.clone());

    let tokens = TokenPair {
        source: env::var("SOURCE_TOKEN_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_SOURCE_TOKEN.to_string()),
        dest: env::var("DEST_TOKEN_ADDRESS").unwrap_or_else(|_| DEFAULT_DEST_TOKEN.to_string()),
    };

    let state = AppState {
        price_oracle,
        fills,
        sessions,
        vault_poller,
        gateway,
        tokens,
    };

    // Build router
    let app = Router::new()
        .route("/", get(health))
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
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3000);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("Failed to bind server port");

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "DCA vault backend up"
}

fn build_gateway(
    rpc_url: Option<&str>,
    vault_address: Option<&str>,
    sessions: Arc<SessionManager>,
    poller: vault_state_sync::VaultPollerHandle,
) -> Option<Arc<VaultGateway>> {
    let (rpc_url, vault_address) = match (rpc_url, vault_address) {
        (Some(rpc), Some(addr)) => (rpc, addr),
        _ => return None,
    };

    let signer_key = match env::var("VAULT_SIGNER_KEY") {
        Ok(key) => key,
        Err(_) => {
            tracing::warn!("VAULT_SIGNER_KEY not set - vault actions disabled (read-only mode)");
            return None;
        }
    };

    let signer: PrivateKeySigner = match signer_key.parse() {
        Ok(signer) => signer,
        Err(e) => {
            tracing::error!(error = %e, "Invalid VAULT_SIGNER_KEY, vault actions disabled");
            return None;
        }
    };

    let url = match rpc_url.parse() {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(error = %e, "Invalid VAULT_RPC_URL, vault actions disabled");
            return None;
        }
    };

    let vault = match Address::from_str(vault_address) {
        Ok(address) => address,
        Err(e) => {
            tracing::error!(error = %e, "Invalid VAULT_CONTRACT_ADDRESS, vault actions disabled");
            return None;
        }
    };

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(url);

    let transport = Arc::new(RpcVaultTransport::new(provider, vault));
    Some(Arc::new(VaultGateway::new(transport, sessions, poller)))
}
