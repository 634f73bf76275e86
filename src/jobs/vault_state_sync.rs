//! Vault State Sync Job
//!
//! The explicit scheduler behind the reconstructed vault view: polls the
//! contract reads on a fixed interval, re-reads immediately when the action
//! gateway invalidates after a confirmed transaction, and publishes
//! snapshots over a watch channel only when the observation changed.
//! Supports graceful shutdown via SIGTERM/SIGINT signals.

use std::env;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, info};

use crate::services::order_lifecycle::SessionManager;
use crate::services::vault_reader::{read_vault_state, VaultReads, VaultSnapshot};

/// Default poll interval in seconds.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Environment variable for the poll interval
const ENV_POLL_INTERVAL: &str = "VAULT_POLL_INTERVAL_SECS";

/// Shared handle onto the poller: the latest snapshot plus the invalidation
/// hook used by the action gateway after a confirmed transaction.
#[derive(Clone)]
pub struct VaultPollerHandle {
    snapshot_rx: watch::Receiver<VaultSnapshot>,
    refresh: Arc<Notify>,
}

impl VaultPollerHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> VaultSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<VaultSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Trigger an immediate re-poll (cache invalidation).
    pub fn invalidate(&self) {
        self.refresh.notify_one();
    }

    /// A handle that only ever serves `snapshot`; used when no RPC endpoint
    /// is configured, and by tests.
    pub fn fixed(snapshot: VaultSnapshot) -> Self {
        let (_tx, snapshot_rx) = watch::channel(snapshot);
        Self {
            snapshot_rx,
            refresh: Arc::new(Notify::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::fixed(VaultSnapshot::empty())
    }
}

/// Start the vault state sync job.
///
/// Polls balance / order hash / params on the configured interval and on
/// every invalidation, reconciles the session lifecycle with the observed
/// `has_active_order`, and keeps the last good values (marked stale) when a
/// cycle degrades.
///
/// # Environment Variables
///
/// * `VAULT_POLL_INTERVAL_SECS` - Interval in seconds (default: 10)
pub fn start_vault_state_sync(
    reads: Arc<dyn VaultReads>,
    sessions: Arc<SessionManager>,
) -> VaultPollerHandle {
    let poll_interval_secs: u64 = env::var(ENV_POLL_INTERVAL)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

    let (snapshot_tx, snapshot_rx) = watch::channel(VaultSnapshot::empty());
    let refresh = Arc::new(Notify::new());

    let handle = VaultPollerHandle {
        snapshot_rx,
        refresh: refresh.clone(),
    };

    tokio::spawn(async move {
        info!(poll_interval_secs, "Vault state sync job started");

        let mut ticker = interval(TokioDuration::from_secs(poll_interval_secs));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping vault state sync gracefully");
                    break;
                }
                _ = ticker.tick() => {
                    poll_once(reads.as_ref(), &sessions, &snapshot_tx).await;
                }
                _ = refresh.notified() => {
                    debug!("Vault state cache invalidated, re-polling now");
                    poll_once(reads.as_ref(), &sessions, &snapshot_tx).await;
                }
            }
        }

        info!("Vault state sync job stopped");
    });

    handle
}

async fn poll_once(
    reads: &dyn VaultReads,
    sessions: &SessionManager,
    snapshot_tx: &watch::Sender<VaultSnapshot>,
) {
    // Capture the session generation before any suspension point: if the
    // wallet switches while reads are in flight, this cycle's result must be
    // discarded rather than applied to the new address's state.
    let (address, generation) = sessions.address_and_generation();

    let (mut snapshot, degraded) = read_vault_state(reads, address).await;

    if sessions.generation() != generation {
        debug!("Poll superseded by a wallet switch, discarding result");
        return;
    }

    let previous = snapshot_tx.borrow().clone();

    if previous.address == snapshot.address {
        // A failed lock-surface read must not open the claim gate: the last
        // observed lock stands until a read succeeds again. A released lock
        // reads back as zero, not as a failure, so this never resurrects
        // one; a surface that never produced a value stays absent.
        snapshot.hash_lock = snapshot.hash_lock.or(previous.hash_lock);
        snapshot.refund_time = snapshot.refund_time.or(previous.refund_time);
    }

    if degraded && previous.address == snapshot.address {
        // Retain the last good values for whichever reads failed this cycle.
        snapshot.balance = snapshot.balance.or(previous.balance);
        snapshot.current_order = snapshot.current_order.or(previous.current_order);
        snapshot.params = snapshot.params.or(previous.params);
        snapshot.stale = true;
    } else {
        snapshot.stale = degraded;
    }

    // Receipt events own the machine while a transaction is pending; the
    // controller ignores this call in that case.
    if !degraded {
        let has_active = snapshot.has_active_order();
        let current = snapshot.current_order.filter(|h| !h.is_zero());
        sessions.with_session(|s| s.lifecycle.reconcile(has_active, current));
    }

    // Subscribers are only notified on change.
    if !snapshot.same_observation(&previous) {
        debug!(has_active_order = snapshot.has_active_order(), stale = snapshot.stale,
            "Vault snapshot changed, publishing");
        let _ = snapshot_tx.send(snapshot);
    }
}
