use serde::{Deserialize, Serialize};

use crate::services::order_lifecycle::{ActionKind, OrderPhase};

/// DCA parameters of the active order, stringified for JSON (amounts are
/// uint256 wei values).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaParamsView {
    pub slice_size: String,
    pub start_time: u64,
    pub delta_time: u64,
    pub total_amount: String,
}

/// HTLC claim gate as seen by the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockView {
    pub locked: bool,
    pub refund_time: Option<u64>,
    pub can_claim: bool,
    /// Seconds until the claim unlocks; 0 when claimable now.
    pub remaining_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedMetricsView {
    pub total_spent: String,
    pub total_received: String,
    /// Source units paid per destination unit; absent until something filled.
    pub average_price: Option<String>,
    /// Positive when the realized average beat the current market.
    pub deviation_pct: Option<String>,
}

/// Transaction currently awaiting its receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTxView {
    pub kind: ActionKind,
    pub tx_hash: String,
    /// Set when the receipt wait exceeded its bound.
    pub stuck: bool,
}

/// Full reconstructed vault/order state for `GET /vault`.
#[derive(Debug, Clone, Serialize)]
pub struct VaultStateResponse {
    pub address: Option<String>,
    pub balance_wei: Option<String>,
    /// Balance formatted in whole native units.
    pub balance: Option<String>,
    pub current_order: Option<String>,
    pub has_active_order: bool,
    pub params: Option<DcaParamsView>,
    pub phase: OrderPhase,
    pub pending_tx: Option<PendingTxView>,
    pub lock: Option<LockView>,
    pub metrics: RealizedMetricsView,
    /// True when the last poll cycle failed and older values are shown.
    pub stale: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub connected: bool,
    pub address: Option<String>,
    pub phase: OrderPhase,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    /// Deposit value in wei, decimal string.
    pub amount_wei: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub slice_size: String,
    pub start_time: u64,
    pub delta_time: u64,
    pub total_amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedTxResponse {
    pub tx_hash: String,
}
