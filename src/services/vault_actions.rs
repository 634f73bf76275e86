//! Action Submission Gateway
//!
//! Wraps the four outbound vault calls (deposit, create-order, cancel,
//! withdraw) with pending/confirmed/failed bookkeeping. Each operation
//! returns the transaction hash at submission time; a background watcher
//! then awaits the receipt under an explicit bound, feeds the lifecycle
//! controller the outcome, and invalidates the vault state poller so the
//! next read reflects the confirmed change.
//!
//! The HTLC claim gate is enforced client-side before a withdraw is ever
//! submitted: while `refundTime` is in the future the call is refused with
//! the remaining wait, which the UI uses to disable the action.

use alloy::{
    primitives::{Address, B256, U256},
    providers::Provider,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use chrono::Utc;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::jobs::vault_state_sync::VaultPollerHandle;
use crate::services::order_lifecycle::{ActionKind, LifecycleError, OrderPhase, SessionManager};
use crate::services::vault_reader::{DcaParams, IDcaVault, VaultSnapshot};

/// Default bound on the receipt wait; past it the transaction is surfaced as
/// stuck rather than silently pending forever.
const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;

/// Environment variable for the receipt wait bound
const ENV_RECEIPT_TIMEOUT: &str = "TX_RECEIPT_TIMEOUT_SECS";

/// How often the RPC transport re-checks for a receipt.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum ActionError {
    /// No wallet session; nothing to act on.
    NotConnected,
    /// The lifecycle phase does not permit this action.
    OutOfPhase(OrderPhase),
    /// Another transaction is already awaiting its receipt.
    TxInFlight,
    /// Cancel/withdraw with no known order hash.
    NoOrder,
    /// Order parameters violate the contract invariants.
    InvalidParams(String),
    /// HTLC gate: funds not claimable until `unlock_at`.
    WithdrawLocked { unlock_at: u64, remaining_secs: u64 },
    /// The signer declined; local and non-retryable.
    UserRejected,
    /// Node or transport failure during submission.
    SubmissionFailed(String),
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::NotConnected => write!(f, "no wallet connected"),
            ActionError::OutOfPhase(phase) => write!(f, "action not allowed in phase {:?}", phase),
            ActionError::TxInFlight => write!(f, "a transaction is already in flight"),
            ActionError::NoOrder => write!(f, "no order hash to act on"),
            ActionError::InvalidParams(msg) => write!(f, "invalid order parameters: {}", msg),
            ActionError::WithdrawLocked { remaining_secs, .. } => {
                write!(f, "withdrawal locked for another {}s", remaining_secs)
            }
            ActionError::UserRejected => write!(f, "transaction rejected by signer"),
            ActionError::SubmissionFailed(msg) => write!(f, "submission failed: {}", msg),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<LifecycleError> for ActionError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::OutOfPhase { phase, .. } => ActionError::OutOfPhase(phase),
            LifecycleError::TxInFlight => ActionError::TxInFlight,
        }
    }
}

/// HTLC claim gate derived from the latest snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimGate {
    pub locked: bool,
    pub refund_time: Option<u64>,
    pub can_claim: bool,
    /// Seconds left until the claim unlocks; 0 when claimable.
    pub remaining_secs: u64,
}

/// Evaluate the claim gate at `now_secs` (unix seconds).
pub fn claim_gate(snapshot: &VaultSnapshot, now_secs: u64) -> ClaimGate {
    let locked = matches!(snapshot.hash_lock, Some(lock) if lock != B256::ZERO);
    let refund_time = snapshot.refund_time;

    let can_claim = !locked || refund_time.is_some_and(|t| t < now_secs);
    let remaining_secs = if can_claim {
        0
    } else {
        refund_time.map(|t| t.saturating_sub(now_secs)).unwrap_or(0)
    };

    ClaimGate {
        locked,
        refund_time,
        can_claim,
        remaining_secs,
    }
}

/// Seam over transaction submission so the gateway's bookkeeping is
/// testable without a node or signer.
#[async_trait]
pub trait VaultTransport: Send + Sync {
    async fn submit_deposit(&self, amount_wei: U256) -> Result<B256, ActionError>;
    async fn submit_create_order(&self, params: DcaParams) -> Result<B256, ActionError>;
    async fn submit_cancel(&self, order_hash: B256) -> Result<B256, ActionError>;
    async fn submit_withdraw(&self, order_hash: B256) -> Result<B256, ActionError>;
    /// Resolve once the receipt lands; `true` means the transaction
    /// succeeded on-chain.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<bool, ActionError>;
}

/// Alloy-backed transport over a wallet-filled provider.
pub struct RpcVaultTransport<P> {
    provider: P,
    vault: Address,
}

impl<P> RpcVaultTransport<P> {
    pub fn new(provider: P, vault: Address) -> Self {
        Self { provider, vault }
    }
}

#[async_trait]
impl<P> VaultTransport for RpcVaultTransport<P>
where
    P: Provider<Http<Client>> + Send + Sync + 'static,
{
    async fn submit_deposit(&self, amount_wei: U256) -> Result<B256, ActionError> {
        let pending = IDcaVault::new(self.vault, &self.provider)
            .deposit()
            .value(amount_wei)
            .send()
            .await
            .map_err(map_submit_err)?;
        Ok(*pending.tx_hash())
    }

    async fn submit_create_order(&self, params: DcaParams) -> Result<B256, ActionError> {
        let pending = IDcaVault::new(self.vault, &self.provider)
            .startDca(
                params.slice_size,
                U256::from(params.start_time),
                U256::from(params.delta_time),
                params.total_amount,
            )
            .send()
            .await
            .map_err(map_submit_err)?;
        Ok(*pending.tx_hash())
    }

    async fn submit_cancel(&self, order_hash: B256) -> Result<B256, ActionError> {
        let pending = IDcaVault::new(self.vault, &self.provider)
            .cancelOrder(order_hash)
            .send()
            .await
            .map_err(map_submit_err)?;
        Ok(*pending.tx_hash())
    }

    async fn submit_withdraw(&self, order_hash: B256) -> Result<B256, ActionError> {
        let pending = IDcaVault::new(self.vault, &self.provider)
            .withdraw(order_hash)
            .send()
            .await
            .map_err(map_submit_err)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<bool, ActionError> {
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt.status()),
                Ok(None) => tokio::time::sleep(RECEIPT_POLL_INTERVAL).await,
                Err(e) => return Err(ActionError::SubmissionFailed(e.to_string())),
            }
        }
    }
}

fn map_submit_err(e: alloy::contract::Error) -> ActionError {
    let code = match &e {
        alloy::contract::Error::TransportError(rpc_err) => {
            rpc_err.as_error_resp().map(|resp| resp.code)
        }
        _ => None,
    };
    classify_submit_err(code, e.to_string())
}

/// EIP-1193: code 4001 is the signer's user rejection. Anything else,
/// whatever its message says, is a node or transport failure.
fn classify_submit_err(code: Option<i64>, message: String) -> ActionError {
    if code == Some(4001) {
        ActionError::UserRejected
    } else {
        ActionError::SubmissionFailed(message)
    }
}

/// The gateway proper: phase guards, submission, receipt watch, poller
/// invalidation.
pub struct VaultGateway {
    transport: Arc<dyn VaultTransport>,
    sessions: Arc<SessionManager>,
    poller: VaultPollerHandle,
    receipt_timeout: Duration,
}

impl VaultGateway {
    pub fn new(
        transport: Arc<dyn VaultTransport>,
        sessions: Arc<SessionManager>,
        poller: VaultPollerHandle,
    ) -> Self {
        let receipt_timeout_secs: u64 = env::var(ENV_RECEIPT_TIMEOUT)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECEIPT_TIMEOUT_SECS);

        Self {
            transport,
            sessions,
            poller,
            receipt_timeout: Duration::from_secs(receipt_timeout_secs),
        }
    }

    #[cfg(test)]
    fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub async fn deposit(&self, amount_wei: U256) -> Result<B256, ActionError> {
        self.guard(ActionKind::Deposit)?;
        let tx_hash = self.transport.submit_deposit(amount_wei).await?;
        self.track(ActionKind::Deposit, tx_hash);
        Ok(tx_hash)
    }

    pub async fn create_order(&self, params: DcaParams) -> Result<B256, ActionError> {
        validate_order_params(&params)?;
        self.guard(ActionKind::CreateOrder)?;
        let tx_hash = self.transport.submit_create_order(params).await?;
        self.track(ActionKind::CreateOrder, tx_hash);
        Ok(tx_hash)
    }

    pub async fn cancel_order(&self, order_hash: B256) -> Result<B256, ActionError> {
        self.guard(ActionKind::CancelOrder)?;
        let tx_hash = self.transport.submit_cancel(order_hash).await?;
        self.track(ActionKind::CancelOrder, tx_hash);
        Ok(tx_hash)
    }

    pub async fn withdraw(&self, order_hash: B256) -> Result<B256, ActionError> {
        self.guard(ActionKind::Withdraw)?;

        // The contract would refuse anyway; refuse here with the remaining
        // wait so the UI can show the countdown instead of a revert.
        let now = Utc::now().timestamp().max(0) as u64;
        let gate = claim_gate(&self.poller.snapshot(), now);
        if !gate.can_claim {
            return Err(ActionError::WithdrawLocked {
                unlock_at: gate.refund_time.unwrap_or(0),
                remaining_secs: gate.remaining_secs,
            });
        }

        let tx_hash = self.transport.submit_withdraw(order_hash).await?;
        self.track(ActionKind::Withdraw, tx_hash);
        Ok(tx_hash)
    }

    fn guard(&self, action: ActionKind) -> Result<(), ActionError> {
        match self.sessions.with_session(|s| s.lifecycle.can_submit(action)) {
            None => Err(ActionError::NotConnected),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(())) => Ok(()),
        }
    }

    fn track(&self, action: ActionKind, tx_hash: B256) {
        self.sessions
            .with_session(|s| s.lifecycle.on_submitted(action, tx_hash));
        self.spawn_receipt_watch(action, tx_hash);
    }

    fn spawn_receipt_watch(&self, action: ActionKind, tx_hash: B256) {
        let transport = self.transport.clone();
        let sessions = self.sessions.clone();
        let poller = self.poller.clone();
        let bound = self.receipt_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(bound, transport.wait_for_receipt(tx_hash)).await {
                Ok(Ok(true)) => {
                    info!(?action, %tx_hash, "Transaction confirmed");
                    sessions.with_session(|s| s.lifecycle.on_confirmed(action));
                    // The confirmed write changed on-chain state; re-read now
                    poller.invalidate();
                }
                Ok(Ok(false)) => {
                    warn!(?action, %tx_hash, "Transaction reverted on-chain");
                    sessions.with_session(|s| s.lifecycle.on_failed(action));
                }
                Ok(Err(e)) => {
                    error!(?action, %tx_hash, error = %e, "Receipt watch failed");
                    sessions.with_session(|s| s.lifecycle.on_failed(action));
                }
                Err(_) => {
                    // Bounded wait exceeded: flag as stuck, never hang silent
                    sessions.with_session(|s| s.lifecycle.on_stuck());
                }
            }
        });
    }
}

fn validate_order_params(params: &DcaParams) -> Result<(), ActionError> {
    if params.slice_size.is_zero() {
        return Err(ActionError::InvalidParams("sliceSize must be > 0".into()));
    }
    if params.total_amount < params.slice_size {
        return Err(ActionError::InvalidParams(
            "totalAmount must be >= sliceSize".into(),
        ));
    }
    if params.delta_time == 0 {
        return Err(ActionError::InvalidParams("deltaTime must be > 0".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::order_lifecycle::OrderPhase;
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio::time::{sleep, Duration as TokioDuration};

    #[derive(Clone, Copy)]
    enum Script {
        Confirm,
        Revert,
        Reject,
        Hang,
    }

    struct MockTransport {
        script: Mutex<Script>,
    }

    impl MockTransport {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
            })
        }

        fn submit(&self) -> Result<B256, ActionError> {
            match *self.script.lock() {
                Script::Reject => Err(ActionError::UserRejected),
                _ => Ok(B256::repeat_byte(tx_byte())),
            }
        }
    }

    const fn tx_byte() -> u8 {
        0x42
    }

    #[async_trait]
    impl VaultTransport for MockTransport {
        async fn submit_deposit(&self, _amount_wei: U256) -> Result<B256, ActionError> {
            self.submit()
        }

        async fn submit_create_order(&self, _params: DcaParams) -> Result<B256, ActionError> {
            self.submit()
        }

        async fn submit_cancel(&self, _order_hash: B256) -> Result<B256, ActionError> {
            self.submit()
        }

        async fn submit_withdraw(&self, _order_hash: B256) -> Result<B256, ActionError> {
            self.submit()
        }

        async fn wait_for_receipt(&self, _tx_hash: B256) -> Result<bool, ActionError> {
            let script = *self.script.lock();
            match script {
                Script::Confirm => Ok(true),
                Script::Revert | Script::Reject => Ok(false),
                Script::Hang => {
                    sleep(TokioDuration::from_secs(3600)).await;
                    Ok(true)
                }
            }
        }
    }

    fn gateway(script: Script, snapshot: VaultSnapshot) -> (VaultGateway, Arc<SessionManager>) {
        let sessions = Arc::new(SessionManager::new());
        sessions.connect(Address::repeat_byte(1));
        let gateway = VaultGateway::new(
            MockTransport::new(script),
            sessions.clone(),
            VaultPollerHandle::fixed(snapshot),
        )
        .with_receipt_timeout(Duration::from_millis(50));
        (gateway, sessions)
    }

    fn good_params() -> DcaParams {
        DcaParams {
            slice_size: U256::from(1u64),
            start_time: 0,
            delta_time: 60,
            total_amount: U256::from(10u64),
        }
    }

    async fn settle() {
        // Let the receipt watcher task run
        sleep(TokioDuration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deposit_confirms_into_awaiting_order_creation() {
        let (gateway, sessions) = gateway(Script::Confirm, VaultSnapshot::empty());

        let tx = gateway.deposit(U256::from(10)).await.unwrap();
        assert_eq!(tx, B256::repeat_byte(tx_byte()));
        assert_eq!(
            sessions.lifecycle().unwrap().phase(),
            OrderPhase::Depositing
        );

        settle().await;
        assert_eq!(
            sessions.lifecycle().unwrap().phase(),
            OrderPhase::AwaitingOrderCreation
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_cancel_rolls_back_to_active() {
        let (gateway, sessions) = gateway(Script::Revert, VaultSnapshot::empty());
        sessions.with_session(|s| s.lifecycle.reconcile(true, Some(B256::repeat_byte(9))));

        gateway.cancel_order(B256::repeat_byte(9)).await.unwrap();
        assert_eq!(
            sessions.lifecycle().unwrap().phase(),
            OrderPhase::Cancelling
        );

        settle().await;
        let lc = sessions.lifecycle().unwrap();
        assert_eq!(lc.phase(), OrderPhase::Active);
        assert_eq!(lc.active_order(), Some(B256::repeat_byte(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_rejection_leaves_phase_untouched() {
        let (gateway, sessions) = gateway(Script::Reject, VaultSnapshot::empty());

        let err = gateway.deposit(U256::from(10)).await.unwrap_err();
        assert!(matches!(err, ActionError::UserRejected));
        let lc = sessions.lifecycle().unwrap();
        assert_eq!(lc.phase(), OrderPhase::Idle);
        assert_eq!(lc.in_flight(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_timeout_marks_stuck() {
        let (gateway, sessions) = gateway(Script::Hang, VaultSnapshot::empty());

        gateway.deposit(U256::from(10)).await.unwrap();
        settle().await;

        let lc = sessions.lifecycle().unwrap();
        assert_eq!(lc.phase(), OrderPhase::Depositing);
        assert!(lc.in_flight().unwrap().stuck);
    }

    #[tokio::test]
    async fn test_withdraw_refused_while_locked() {
        let mut snapshot = VaultSnapshot::empty();
        snapshot.hash_lock = Some(B256::repeat_byte(0xcc));
        let unlock_at = (Utc::now().timestamp() + 600) as u64;
        snapshot.refund_time = Some(unlock_at);

        let (gateway, sessions) = gateway(Script::Confirm, snapshot);
        // Reach Withdrawable
        sessions.with_session(|s| {
            s.lifecycle.reconcile(true, Some(B256::repeat_byte(9)));
            s.lifecycle.on_submitted(ActionKind::CancelOrder, B256::repeat_byte(2));
            s.lifecycle.on_confirmed(ActionKind::CancelOrder);
        });

        let err = gateway.withdraw(B256::repeat_byte(9)).await.unwrap_err();
        match err {
            ActionError::WithdrawLocked {
                unlock_at: at,
                remaining_secs,
            } => {
                assert_eq!(at, unlock_at);
                assert!(remaining_secs > 0 && remaining_secs <= 600);
            }
            other => panic!("expected WithdrawLocked, got {:?}", other),
        }
        // Nothing was submitted
        assert_eq!(sessions.lifecycle().unwrap().in_flight(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_allowed_after_refund_time() {
        let mut snapshot = VaultSnapshot::empty();
        snapshot.hash_lock = Some(B256::repeat_byte(0xcc));
        snapshot.refund_time = Some(1); // long past

        let (gateway, sessions) = gateway(Script::Confirm, snapshot);
        sessions.with_session(|s| {
            s.lifecycle.reconcile(true, Some(B256::repeat_byte(9)));
            s.lifecycle.on_submitted(ActionKind::CancelOrder, B256::repeat_byte(2));
            s.lifecycle.on_confirmed(ActionKind::CancelOrder);
        });

        gateway.withdraw(B256::repeat_byte(9)).await.unwrap();
        settle().await;
        assert_eq!(sessions.lifecycle().unwrap().phase(), OrderPhase::Idle);
    }

    #[tokio::test]
    async fn test_out_of_phase_deposit_rejected() {
        let (gateway, sessions) = gateway(Script::Confirm, VaultSnapshot::empty());
        sessions.with_session(|s| s.lifecycle.reconcile(true, Some(B256::repeat_byte(9))));

        let err = gateway.deposit(U256::from(10)).await.unwrap_err();
        assert!(matches!(err, ActionError::OutOfPhase(OrderPhase::Active)));
    }

    #[tokio::test]
    async fn test_invalid_order_params_rejected() {
        let (gateway, _sessions) = gateway(Script::Confirm, VaultSnapshot::empty());

        let mut params = good_params();
        params.slice_size = U256::ZERO;
        assert!(matches!(
            gateway.create_order(params).await.unwrap_err(),
            ActionError::InvalidParams(_)
        ));

        let mut params = good_params();
        params.total_amount = U256::ZERO;
        assert!(matches!(
            gateway.create_order(params).await.unwrap_err(),
            ActionError::InvalidParams(_)
        ));

        let mut params = good_params();
        params.delta_time = 0;
        assert!(matches!(
            gateway.create_order(params).await.unwrap_err(),
            ActionError::InvalidParams(_)
        ));
    }

    #[test]
    fn test_submit_error_classified_by_rpc_code() {
        assert!(matches!(
            classify_submit_err(Some(4001), "user rejected the request".into()),
            ActionError::UserRejected
        ));
        // A node message that merely mentions rejection is not a signer
        // rejection
        assert!(matches!(
            classify_submit_err(None, "transaction rejected by the pool".into()),
            ActionError::SubmissionFailed(_)
        ));
        assert!(matches!(
            classify_submit_err(Some(-32000), "access denied".into()),
            ActionError::SubmissionFailed(_)
        ));
    }

    #[test]
    fn test_claim_gate_without_lock_is_claimable() {
        let gate = claim_gate(&VaultSnapshot::empty(), 1000);
        assert!(!gate.locked);
        assert!(gate.can_claim);
        assert_eq!(gate.remaining_secs, 0);
    }

    #[test]
    fn test_claim_gate_counts_down() {
        let mut snapshot = VaultSnapshot::empty();
        snapshot.hash_lock = Some(B256::repeat_byte(0xcc));
        snapshot.refund_time = Some(1600);

        let gate = claim_gate(&snapshot, 1000);
        assert!(gate.locked);
        assert!(!gate.can_claim);
        assert_eq!(gate.remaining_secs, 600);

        let gate = claim_gate(&snapshot, 1601);
        assert!(gate.can_claim);
        assert_eq!(gate.remaining_secs, 0);
    }
}
