//! Order Lifecycle Controller
//!
//! State machine governing the reconstructed view of a DCA order:
//! Idle -> Depositing -> AwaitingOrderCreation -> Active -> Cancelling ->
//! Withdrawable -> Idle.
//!
//! Transitions are driven by transaction receipt events and by polled
//! `has_active_order` reads. The receipt signal is authoritative for the
//! transition just performed; polled state is reconciled only while no
//! transaction is in flight, so poll lag cannot make the machine oscillate.
//!
//! One controller exists per connected wallet session: created at connect,
//! reset at disconnect.

use alloy::primitives::{Address, B256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderPhase {
    Idle,
    Depositing,
    AwaitingOrderCreation,
    Active,
    Cancelling,
    Withdrawable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Deposit,
    CreateOrder,
    CancelOrder,
    Withdraw,
}

/// Transaction submitted and awaiting its receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightTx {
    pub kind: ActionKind,
    pub tx_hash: B256,
    /// Receipt wait exceeded its bound; surfaced to the UI, never silent.
    pub stuck: bool,
}

#[derive(Debug)]
pub enum LifecycleError {
    /// The requested action is not valid in the current phase.
    OutOfPhase {
        action: ActionKind,
        phase: OrderPhase,
    },
    /// Another transaction is already awaiting its receipt.
    TxInFlight,
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::OutOfPhase { action, phase } => {
                write!(f, "action {:?} not allowed in phase {:?}", action, phase)
            }
            LifecycleError::TxInFlight => write!(f, "a transaction is already in flight"),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// The per-session state machine.
#[derive(Debug, Clone)]
pub struct OrderLifecycle {
    phase: OrderPhase,
    /// Hash of the order this session is acting on. Survives Cancelling and
    /// Withdrawable so a failed cancel keeps the original hash and the
    /// withdraw call knows what to claim.
    active_order: Option<B256>,
    in_flight: Option<InFlightTx>,
}

impl OrderLifecycle {
    pub fn new() -> Self {
        Self {
            phase: OrderPhase::Idle,
            active_order: None,
            in_flight: None,
        }
    }

    pub fn phase(&self) -> OrderPhase {
        self.phase
    }

    pub fn active_order(&self) -> Option<B256> {
        self.active_order
    }

    pub fn in_flight(&self) -> Option<InFlightTx> {
        self.in_flight
    }

    /// Gate an action on the current phase, before anything is submitted.
    pub fn can_submit(&self, action: ActionKind) -> Result<(), LifecycleError> {
        if self.in_flight.is_some() {
            return Err(LifecycleError::TxInFlight);
        }

        let allowed = match action {
            ActionKind::Deposit => self.phase == OrderPhase::Idle,
            ActionKind::CreateOrder => self.phase == OrderPhase::AwaitingOrderCreation,
            ActionKind::CancelOrder => self.phase == OrderPhase::Active,
            ActionKind::Withdraw => self.phase == OrderPhase::Withdrawable,
        };

        if allowed {
            Ok(())
        } else {
            Err(LifecycleError::OutOfPhase {
                action,
                phase: self.phase,
            })
        }
    }

    /// A transaction was submitted and accepted by the node.
    pub fn on_submitted(&mut self, action: ActionKind, tx_hash: B256) {
        self.in_flight = Some(InFlightTx {
            kind: action,
            tx_hash,
            stuck: false,
        });

        match action {
            ActionKind::Deposit => self.phase = OrderPhase::Depositing,
            ActionKind::CancelOrder => self.phase = OrderPhase::Cancelling,
            // Create/withdraw keep their entry phase until the receipt lands.
            ActionKind::CreateOrder | ActionKind::Withdraw => {}
        }

        tracing::debug!(?action, phase = ?self.phase, %tx_hash, "Transaction submitted");
    }

    /// The receipt confirmed success. Authoritative over polled state.
    pub fn on_confirmed(&mut self, action: ActionKind) {
        self.in_flight = None;

        self.phase = match action {
            ActionKind::Deposit => OrderPhase::AwaitingOrderCreation,
            ActionKind::CreateOrder => OrderPhase::Active,
            ActionKind::CancelOrder => OrderPhase::Withdrawable,
            ActionKind::Withdraw => {
                self.active_order = None;
                OrderPhase::Idle
            }
        };

        tracing::info!(?action, phase = ?self.phase, "Transaction confirmed");
    }

    /// The transaction failed or reverted: roll back to the phase the
    /// machine held before the transition was attempted.
    pub fn on_failed(&mut self, action: ActionKind) {
        self.in_flight = None;

        self.phase = match action {
            ActionKind::Deposit | ActionKind::CreateOrder => OrderPhase::Idle,
            // Failed cancel returns to Active with the original hash intact
            ActionKind::CancelOrder => OrderPhase::Active,
            ActionKind::Withdraw => OrderPhase::Withdrawable,
        };

        tracing::warn!(?action, phase = ?self.phase, "Transaction failed, phase rolled back");
    }

    /// The receipt wait exceeded its bound. The transaction stays pending
    /// and is flagged so the UI shows a stuck state.
    pub fn on_stuck(&mut self) {
        if let Some(tx) = self.in_flight.as_mut() {
            tx.stuck = true;
            tracing::warn!(tx_hash = %tx.tx_hash, "Receipt wait timed out, transaction marked stuck");
        }
    }

    /// Reconcile with a polled on-chain read. Only applies while no
    /// transaction is in flight; the receipt watcher owns the machine
    /// otherwise.
    pub fn reconcile(&mut self, has_active_order: bool, current_order: Option<B256>) {
        if self.in_flight.is_some() {
            return;
        }

        if has_active_order {
            // Track the live hash whenever the chain shows an order.
            if current_order.is_some() {
                self.active_order = current_order;
            }
            match self.phase {
                OrderPhase::Idle | OrderPhase::AwaitingOrderCreation => {
                    tracing::debug!("Poll shows an active order, entering Active");
                    self.phase = OrderPhase::Active;
                }
                _ => {}
            }
        } else if self.phase == OrderPhase::Active {
            // The order completed or was cancelled out-of-band; funds are
            // claimable.
            tracing::debug!("Active order gone on-chain, entering Withdrawable");
            self.phase = OrderPhase::Withdrawable;
        }
    }
}

impl Default for OrderLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct WalletSession {
    pub address: Address,
    pub lifecycle: OrderLifecycle,
}

/// Holds the single wallet session and its generation counter.
///
/// The generation bumps on every connect/disconnect; poll cycles capture it
/// before their reads and discard results if it moved, so a fetch started
/// for one wallet can never land on another's state.
pub struct SessionManager {
    inner: Mutex<Option<WalletSession>>,
    generation: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Connect a wallet, resetting any previous session.
    pub fn connect(&self, address: Address) -> u64 {
        let mut inner = self.inner.lock();
        *inner = Some(WalletSession {
            address,
            lifecycle: OrderLifecycle::new(),
        });
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(%address, generation, "Wallet connected, session reset");
        generation
    }

    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.take().is_some() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            tracing::info!("Wallet disconnected, session cleared");
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Address of the connected wallet together with the generation the
    /// caller must re-check before applying fetched state.
    pub fn address_and_generation(&self) -> (Option<Address>, u64) {
        let address = self.inner.lock().as_ref().map(|s| s.address);
        (address, self.generation())
    }

    /// Run `f` against the live session, if any.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut WalletSession) -> R) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }

    pub fn lifecycle(&self) -> Option<OrderLifecycle> {
        self.inner.lock().as_ref().map(|s| s.lifecycle.clone())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn test_deposit_then_create_reaches_active() {
        let mut lc = OrderLifecycle::new();
        assert_eq!(lc.phase(), OrderPhase::Idle);

        lc.can_submit(ActionKind::Deposit).unwrap();
        lc.on_submitted(ActionKind::Deposit, hash(1));
        assert_eq!(lc.phase(), OrderPhase::Depositing);

        lc.on_confirmed(ActionKind::Deposit);
        assert_eq!(lc.phase(), OrderPhase::AwaitingOrderCreation);

        lc.can_submit(ActionKind::CreateOrder).unwrap();
        lc.on_submitted(ActionKind::CreateOrder, hash(2));
        lc.on_confirmed(ActionKind::CreateOrder);
        assert_eq!(lc.phase(), OrderPhase::Active);

        // Next poll sees the order and records its hash
        lc.reconcile(true, Some(hash(9)));
        assert_eq!(lc.phase(), OrderPhase::Active);
        assert_eq!(lc.active_order(), Some(hash(9)));
    }

    #[test]
    fn test_failed_deposit_returns_to_idle() {
        let mut lc = OrderLifecycle::new();
        lc.on_submitted(ActionKind::Deposit, hash(1));
        lc.on_failed(ActionKind::Deposit);
        assert_eq!(lc.phase(), OrderPhase::Idle);
        assert_eq!(lc.in_flight(), None);
    }

    #[test]
    fn test_failed_cancel_restores_active_with_original_hash() {
        let mut lc = OrderLifecycle::new();
        lc.on_submitted(ActionKind::CreateOrder, hash(1));
        lc.on_confirmed(ActionKind::CreateOrder);
        lc.reconcile(true, Some(hash(9)));

        lc.can_submit(ActionKind::CancelOrder).unwrap();
        lc.on_submitted(ActionKind::CancelOrder, hash(2));
        assert_eq!(lc.phase(), OrderPhase::Cancelling);

        lc.on_failed(ActionKind::CancelOrder);
        assert_eq!(lc.phase(), OrderPhase::Active);
        assert_eq!(lc.active_order(), Some(hash(9)));
    }

    #[test]
    fn test_only_cancel_confirmation_reaches_withdrawable() {
        let mut lc = OrderLifecycle::new();
        lc.on_submitted(ActionKind::CreateOrder, hash(1));
        lc.on_confirmed(ActionKind::CreateOrder);
        lc.reconcile(true, Some(hash(9)));

        // Deposit and withdraw are rejected from Active
        assert!(lc.can_submit(ActionKind::Deposit).is_err());
        assert!(lc.can_submit(ActionKind::Withdraw).is_err());

        lc.on_submitted(ActionKind::CancelOrder, hash(2));
        lc.on_confirmed(ActionKind::CancelOrder);
        assert_eq!(lc.phase(), OrderPhase::Withdrawable);
        // Hash retained for the withdraw call
        assert_eq!(lc.active_order(), Some(hash(9)));
    }

    #[test]
    fn test_withdraw_confirmation_closes_the_loop() {
        let mut lc = OrderLifecycle::new();
        lc.on_submitted(ActionKind::CreateOrder, hash(1));
        lc.on_confirmed(ActionKind::CreateOrder);
        lc.reconcile(true, Some(hash(9)));
        lc.on_submitted(ActionKind::CancelOrder, hash(2));
        lc.on_confirmed(ActionKind::CancelOrder);

        lc.can_submit(ActionKind::Withdraw).unwrap();
        lc.on_submitted(ActionKind::Withdraw, hash(3));
        assert_eq!(lc.phase(), OrderPhase::Withdrawable);

        lc.on_confirmed(ActionKind::Withdraw);
        assert_eq!(lc.phase(), OrderPhase::Idle);
        assert_eq!(lc.active_order(), None);
    }

    #[test]
    fn test_poll_lag_does_not_oscillate_in_flight() {
        let mut lc = OrderLifecycle::new();
        lc.on_submitted(ActionKind::CreateOrder, hash(1));
        lc.on_confirmed(ActionKind::CreateOrder);
        lc.reconcile(true, Some(hash(9)));

        lc.on_submitted(ActionKind::CancelOrder, hash(2));
        // A lagging poll still sees the order; the in-flight cancel wins
        lc.reconcile(true, Some(hash(9)));
        assert_eq!(lc.phase(), OrderPhase::Cancelling);

        lc.on_confirmed(ActionKind::CancelOrder);
        assert_eq!(lc.phase(), OrderPhase::Withdrawable);

        // Post-confirmation poll showing the hash gone must not regress
        lc.reconcile(false, None);
        assert_eq!(lc.phase(), OrderPhase::Withdrawable);
    }

    #[test]
    fn test_completed_order_becomes_withdrawable() {
        let mut lc = OrderLifecycle::new();
        lc.reconcile(true, Some(hash(9)));
        assert_eq!(lc.phase(), OrderPhase::Active);

        // All slices executed; hash zeroed on-chain
        lc.reconcile(false, None);
        assert_eq!(lc.phase(), OrderPhase::Withdrawable);
    }

    #[test]
    fn test_stuck_flag_set_on_timeout() {
        let mut lc = OrderLifecycle::new();
        lc.on_submitted(ActionKind::Deposit, hash(1));
        lc.on_stuck();
        let tx = lc.in_flight().unwrap();
        assert!(tx.stuck);
        assert_eq!(tx.kind, ActionKind::Deposit);
    }

    #[test]
    fn test_session_generation_moves_on_connect_and_disconnect() {
        let sessions = SessionManager::new();
        let (addr, gen0) = sessions.address_and_generation();
        assert!(addr.is_none());

        let gen1 = sessions.connect(Address::repeat_byte(1));
        assert!(gen1 > gen0);

        // Wallet switch resets the lifecycle
        sessions.with_session(|s| s.lifecycle.on_submitted(ActionKind::Deposit, hash(1)));
        let gen2 = sessions.connect(Address::repeat_byte(2));
        assert!(gen2 > gen1);
        assert_eq!(sessions.lifecycle().unwrap().phase(), OrderPhase::Idle);

        sessions.disconnect();
        assert!(sessions.lifecycle().is_none());
        assert!(sessions.generation() > gen2);
    }
}
