use alloy::primitives::{B256, U256};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::{
    models::{
        common::ErrorResponse,
        vault::{
            CreateOrderRequest, DcaParamsView, DepositRequest, LockView, PendingTxView,
            RealizedMetricsView, SubmittedTxResponse, VaultStateResponse,
        },
    },
    services::{
        metrics::compute_realized,
        order_lifecycle::OrderPhase,
        vault_actions::{claim_gate, ActionError, VaultGateway},
        vault_reader::DcaParams,
    },
    AppState,
};

/// Handler for GET /vault
/// The reconstructed vault/order view: latest polled snapshot, lifecycle
/// phase, realized metrics, and the HTLC claim gate.
pub async fn get_vault_state(State(state): State<AppState>) -> Json<VaultStateResponse> {
    let snapshot = state.vault_poller.snapshot();
    let lifecycle = state.sessions.lifecycle();

    let phase = lifecycle
        .as_ref()
        .map(|l| l.phase())
        .unwrap_or(OrderPhase::Idle);

    let pending_tx = lifecycle.as_ref().and_then(|l| l.in_flight()).map(|tx| {
        PendingTxView {
            kind: tx.kind,
            tx_hash: tx.tx_hash.to_string(),
            stuck: tx.stuck,
        }
    });

    let metrics = {
        let fills = state.fills.fills();
        let ratio = market_ratio(&state).await;
        let realized = compute_realized(&fills, ratio);
        RealizedMetricsView {
            total_spent: realized.total_spent.to_string(),
            total_received: realized.total_received.to_string(),
            average_price: realized.average_price.map(|p| p.to_string()),
            deviation_pct: realized.deviation_pct.map(|d| d.round_dp(2).to_string()),
        }
    };

    let lock = if snapshot.hash_lock.is_some() || snapshot.refund_time.is_some() {
        let now = Utc::now().timestamp().max(0) as u64;
        let gate = claim_gate(&snapshot, now);
        Some(LockView {
            locked: gate.locked,
            refund_time: gate.refund_time,
            can_claim: gate.can_claim,
            remaining_secs: gate.remaining_secs,
        })
    } else {
        None
    };

    let current_order = snapshot.current_order.filter(|h| !h.is_zero());

    Json(VaultStateResponse {
        address: snapshot.address.map(|a| a.to_string()),
        balance_wei: snapshot.balance.map(|b| b.to_string()),
        balance: snapshot
            .balance
            .map(alloy::primitives::utils::format_ether),
        has_active_order: snapshot.has_active_order(),
        current_order: current_order.map(|h| h.to_string()),
        params: snapshot.params.map(|p| DcaParamsView {
            slice_size: p.slice_size.to_string(),
            start_time: p.start_time,
            delta_time: p.delta_time,
            total_amount: p.total_amount.to_string(),
        }),
        phase,
        pending_tx,
        lock,
        metrics,
        stale: snapshot.stale,
    })
}

/// Handler for POST /vault/deposit
pub async fn deposit(
    State(state): State<AppState>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<SubmittedTxResponse>, (StatusCode, Json<ErrorResponse>)> {
    let gateway = require_gateway(&state)?;

    let amount = U256::from_str(&request.amount_wei).map_err(|_| {
        bad_request(format!("invalid amount_wei: {}", request.amount_wei))
    })?;

    let tx_hash = gateway.deposit(amount).await.map_err(map_action_err)?;
    Ok(Json(SubmittedTxResponse {
        tx_hash: tx_hash.to_string(),
    }))
}

/// Handler for POST /vault/order
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<SubmittedTxResponse>, (StatusCode, Json<ErrorResponse>)> {
    let gateway = require_gateway(&state)?;

    let slice_size = U256::from_str(&request.slice_size)
        .map_err(|_| bad_request(format!("invalid slice_size: {}", request.slice_size)))?;
    let total_amount = U256::from_str(&request.total_amount)
        .map_err(|_| bad_request(format!("invalid total_amount: {}", request.total_amount)))?;

    let params = DcaParams {
        slice_size,
        start_time: request.start_time,
        delta_time: request.delta_time,
        total_amount,
    };

    let tx_hash = gateway.create_order(params).await.map_err(map_action_err)?;
    Ok(Json(SubmittedTxResponse {
        tx_hash: tx_hash.to_string(),
    }))
}

/// Handler for POST /vault/order/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
) -> Result<Json<SubmittedTxResponse>, (StatusCode, Json<ErrorResponse>)> {
    let gateway = require_gateway(&state)?;
    let order_hash = known_order(&state).ok_or_else(|| map_action_err(ActionError::NoOrder))?;

    let tx_hash = gateway.cancel_order(order_hash).await.map_err(map_action_err)?;
    Ok(Json(SubmittedTxResponse {
        tx_hash: tx_hash.to_string(),
    }))
}

/// Handler for POST /vault/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
) -> Result<Json<SubmittedTxResponse>, (StatusCode, Json<ErrorResponse>)> {
    let gateway = require_gateway(&state)?;
    let order_hash = known_order(&state).ok_or_else(|| map_action_err(ActionError::NoOrder))?;

    let tx_hash = gateway.withdraw(order_hash).await.map_err(map_action_err)?;
    Ok(Json(SubmittedTxResponse {
        tx_hash: tx_hash.to_string(),
    }))
}

/// Current market rate in destination units per source unit, from the two
/// oracle lookups. `None` (metrics fall back to explicit receipts only)
/// when either leg is unavailable.
async fn market_ratio(state: &AppState) -> Option<Decimal> {
    let source_usd = match state.price_oracle.get_price(&state.tokens.source).await {
        Ok(price) => price,
        Err(e) => {
            tracing::debug!(error = %e, "Source leg price unavailable");
            return None;
        }
    };
    let dest_usd = match state.price_oracle.get_price(&state.tokens.dest).await {
        Ok(price) => price,
        Err(e) => {
            tracing::debug!(error = %e, "Destination leg price unavailable");
            return None;
        }
    };

    if dest_usd.is_zero() {
        return None;
    }
    Some(source_usd / dest_usd)
}

/// The order hash cancel/withdraw act on: the session's tracked order, or
/// the live hash from the latest snapshot.
fn known_order(state: &AppState) -> Option<B256> {
    state
        .sessions
        .lifecycle()
        .and_then(|l| l.active_order())
        .or_else(|| state.vault_poller.snapshot().current_order.filter(|h| !h.is_zero()))
}

fn require_gateway(
    state: &AppState,
) -> Result<&VaultGateway, (StatusCode, Json<ErrorResponse>)> {
    state.gateway.as_deref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "vault transport not configured".to_string(),
            }),
        )
    })
}

fn bad_request(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message }))
}

fn map_action_err(e: ActionError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        ActionError::NotConnected
        | ActionError::OutOfPhase(_)
        | ActionError::TxInFlight
        | ActionError::NoOrder
        | ActionError::WithdrawLocked { .. } => StatusCode::CONFLICT,
        ActionError::InvalidParams(_) | ActionError::UserRejected => StatusCode::BAD_REQUEST,
        ActionError::SubmissionFailed(_) => StatusCode::BAD_GATEWAY,
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}
