//! Fill History Sync Job
//!
//! Optionally syncs the bounded fill window from the upstream order-book
//! history feed. Fills are recorded upstream against the vault's maker
//! address, so the configured vault contract address is the query key.
//! Disabled unless the feed URL is configured; `POST /fill` remains the
//! other writer either way.

use std::env;
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{info, warn};

use crate::services::fill_ledger::{FillLedgerService, FillStore};

/// Default sync interval in seconds.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 8;

/// Environment variable for the history feed base URL
const ENV_FILL_HISTORY_URL: &str = "FILL_HISTORY_URL";

/// Environment variable for the vault (maker) contract address
const ENV_VAULT_ADDRESS: &str = "VAULT_CONTRACT_ADDRESS";

/// Environment variable for the sync interval
const ENV_SYNC_INTERVAL: &str = "FILL_SYNC_INTERVAL_SECS";

/// Start the fill history sync job.
///
/// # Environment Variables
///
/// * `FILL_HISTORY_URL` - History feed base URL (job disabled when unset)
/// * `VAULT_CONTRACT_ADDRESS` - Maker address fills are recorded against
/// * `FILL_SYNC_INTERVAL_SECS` - Interval in seconds (default: 8)
pub fn start_fill_history_sync(store: Arc<FillStore>) {
    let base_url = match env::var(ENV_FILL_HISTORY_URL) {
        Ok(url) => url,
        Err(_) => {
            warn!(
                "FILL_HISTORY_URL not set - fill history sync disabled. \
                 The fill feed will only reflect POST /fill notifications."
            );
            return;
        }
    };

    let maker_address = match env::var(ENV_VAULT_ADDRESS) {
        Ok(addr) => addr,
        Err(_) => {
            warn!("VAULT_CONTRACT_ADDRESS not set - fill history sync disabled.");
            return;
        }
    };

    let sync_interval_secs: u64 = env::var(ENV_SYNC_INTERVAL)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);

    let ledger = FillLedgerService::new(base_url);

    tokio::spawn(async move {
        info!(
            maker = %maker_address,
            sync_interval_secs,
            "Fill history sync job started"
        );

        let mut ticker = interval(TokioDuration::from_secs(sync_interval_secs));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping fill history sync gracefully");
                    break;
                }
                _ = ticker.tick() => {
                    match ledger.list_fills(&maker_address).await {
                        Ok(fills) => {
                            // An empty history is a valid state, not an error
                            tracing::debug!(count = fills.len(), "Fill history synced");
                            store.replace_all(fills);
                        }
                        Err(e) => {
                            // Recoverable; next tick retries
                            warn!(error = %e, "Fill history sync failed");
                        }
                    }
                }
            }
        }

        info!("Fill history sync job stopped");
    });
}
