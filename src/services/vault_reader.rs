//! Vault State Reader
//!
//! Reconstructs the vault/order view from on-chain reads: caller balance,
//! the global current order hash, the DCA parameters behind that hash, and
//! the HTLC claim gate.
//!
//! The three primary reads are independent view calls, not a transaction: a
//! revert on one never stops the others. `dcaParamsOf` is only invoked when
//! the hash captured in the *same* cycle is non-zero; querying with the
//! zero sentinel is undefined behavior on the contract side and must never
//! happen.

use alloy::{
    primitives::{Address, B256, U256},
    providers::{ProviderBuilder, RootProvider},
    sol,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use tracing::{debug, warn};

// Vault contract surface consumed by this service (views only; the mutating
// half lives in the action gateway).
sol! {
    #[sol(rpc)]
    interface IDcaVault {
        function deposit() external payable;
        function vaultBalanceOf(address user) external view returns (uint256);
        function currentOrder() external view returns (bytes32);
        function dcaParamsOf(bytes32 orderHash) external view returns (uint256 sliceSize, uint256 startTime, uint256 deltaTime, uint256 totalAmount);
        function startDca(uint256 sliceSize, uint256 startTime, uint256 deltaTime, uint256 totalAmount) external;
        function cancelOrder(bytes32 orderHash) external;
        function withdraw(bytes32 orderHash) external;
        function hashLock() external view returns (bytes32);
        function refundTime() external view returns (uint256);
    }
}

/// DCA schedule of the active order, owned by the contract and read-only
/// here. Invariant on-chain: `totalAmount >= sliceSize > 0`, `deltaTime > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcaParams {
    pub slice_size: U256,
    pub start_time: u64,
    pub delta_time: u64,
    pub total_amount: U256,
}

#[derive(Debug)]
pub enum VaultReadError {
    /// A view call reverted or the node rejected it.
    ReadReverted(String),
    InvalidConfig(String),
}

impl std::fmt::Display for VaultReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultReadError::ReadReverted(msg) => write!(f, "read reverted: {}", msg),
            VaultReadError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for VaultReadError {}

/// Seam over the vault's view calls so the read algorithm and its consumers
/// are testable without a node.
#[async_trait]
pub trait VaultReads: Send + Sync {
    async fn balance_of(&self, user: Address) -> Result<U256, VaultReadError>;
    async fn current_order(&self) -> Result<B256, VaultReadError>;
    async fn dca_params_of(&self, order_hash: B256) -> Result<DcaParams, VaultReadError>;
    async fn hash_lock(&self) -> Result<B256, VaultReadError>;
    async fn refund_time(&self) -> Result<u64, VaultReadError>;
}

/// Alloy-backed reader over an HTTP provider.
pub struct RpcVaultReader {
    provider: RootProvider<Http<Client>>,
    vault: Address,
}

impl RpcVaultReader {
    pub fn new(rpc_url: &str, vault_address: &str) -> Result<Self, VaultReadError> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse().map_err(|e| {
            VaultReadError::InvalidConfig(format!("Invalid vault RPC URL: {}", e))
        })?);

        let vault = Address::from_str(vault_address).map_err(|e| {
            VaultReadError::InvalidConfig(format!("Invalid vault address: {}", e))
        })?;

        Ok(Self { provider, vault })
    }
}

#[async_trait]
impl VaultReads for RpcVaultReader {
    async fn balance_of(&self, user: Address) -> Result<U256, VaultReadError> {
        IDcaVault::new(self.vault, &self.provider)
            .vaultBalanceOf(user)
            .call()
            .await
            .map(|r| r._0)
            .map_err(|e| VaultReadError::ReadReverted(e.to_string()))
    }

    async fn current_order(&self) -> Result<B256, VaultReadError> {
        IDcaVault::new(self.vault, &self.provider)
            .currentOrder()
            .call()
            .await
            .map(|r| r._0)
            .map_err(|e| VaultReadError::ReadReverted(e.to_string()))
    }

    async fn dca_params_of(&self, order_hash: B256) -> Result<DcaParams, VaultReadError> {
        IDcaVault::new(self.vault, &self.provider)
            .dcaParamsOf(order_hash)
            .call()
            .await
            .map(|r| DcaParams {
                slice_size: r.sliceSize,
                start_time: u64::try_from(r.startTime).unwrap_or(u64::MAX),
                delta_time: u64::try_from(r.deltaTime).unwrap_or(u64::MAX),
                total_amount: r.totalAmount,
            })
            .map_err(|e| VaultReadError::ReadReverted(e.to_string()))
    }

    async fn hash_lock(&self) -> Result<B256, VaultReadError> {
        IDcaVault::new(self.vault, &self.provider)
            .hashLock()
            .call()
            .await
            .map(|r| r._0)
            .map_err(|e| VaultReadError::ReadReverted(e.to_string()))
    }

    async fn refund_time(&self) -> Result<u64, VaultReadError> {
        IDcaVault::new(self.vault, &self.provider)
            .refundTime()
            .call()
            .await
            .map(|r| u64::try_from(r._0).unwrap_or(u64::MAX))
            .map_err(|e| VaultReadError::ReadReverted(e.to_string()))
    }
}

/// One reconstructed observation of the vault.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultSnapshot {
    /// Wallet the balance was read for; `None` while disconnected.
    pub address: Option<Address>,
    pub balance: Option<U256>,
    pub current_order: Option<B256>,
    pub params: Option<DcaParams>,
    pub hash_lock: Option<B256>,
    pub refund_time: Option<u64>,
    /// The last cycle failed and older values are being shown.
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

impl VaultSnapshot {
    pub fn empty() -> Self {
        Self {
            address: None,
            balance: None,
            current_order: None,
            params: None,
            hash_lock: None,
            refund_time: None,
            stale: false,
            fetched_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn has_active_order(&self) -> bool {
        matches!(self.current_order, Some(hash) if hash != B256::ZERO)
    }

    /// True when both snapshots carry the same observed chain state; the
    /// fetch timestamp is not part of the observation.
    pub fn same_observation(&self, other: &Self) -> bool {
        self.address == other.address
            && self.balance == other.balance
            && self.current_order == other.current_order
            && self.params == other.params
            && self.hash_lock == other.hash_lock
            && self.refund_time == other.refund_time
            && self.stale == other.stale
    }
}

/// Execute one poll cycle. Returns the snapshot plus a `degraded` flag set
/// when any primary read failed (the poller then retains previous values).
pub async fn read_vault_state(
    reads: &dyn VaultReads,
    user: Option<Address>,
) -> (VaultSnapshot, bool) {
    let mut degraded = false;

    // (a) balance, only when a wallet is connected; independent of (b)
    let balance = match user {
        Some(address) => match reads.balance_of(address).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%address, error = %e, "Balance read failed");
                degraded = true;
                None
            }
        },
        None => None,
    };

    // (b) the single global order hash
    let current_order = match reads.current_order().await {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!(error = %e, "Order hash read failed");
            degraded = true;
            None
        }
    };

    // (c) params, only for a non-zero hash captured *this* cycle
    let params = match current_order {
        Some(hash) if hash != B256::ZERO => match reads.dca_params_of(hash).await {
            Ok(params) => Some(params),
            Err(e) => {
                warn!(order_hash = %hash, error = %e, "Params read failed");
                degraded = true;
                None
            }
        },
        _ => None,
    };

    // HTLC gate; a missing lock surface on older deployments is tolerated
    let hash_lock = match reads.hash_lock().await {
        Ok(lock) => Some(lock),
        Err(e) => {
            debug!(error = %e, "Hash lock read failed");
            None
        }
    };

    let refund_time = match reads.refund_time().await {
        Ok(time) => Some(time),
        Err(e) => {
            debug!(error = %e, "Refund time read failed");
            None
        }
    };

    let snapshot = VaultSnapshot {
        address: user,
        balance,
        current_order,
        params,
        hash_lock,
        refund_time,
        stale: false,
        fetched_at: Utc::now(),
    };

    (snapshot, degraded)
}
