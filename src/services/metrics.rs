//! Derived Metrics Engine
//!
//! Folds the known fills into realized spend/receipt totals and compares the
//! implied average execution price against the live market.
//!
//! Convention: `average_price` is an asset-to-asset ratio, source units paid
//! per destination unit (e.g. ETH per WBTC), never a USD notional. The
//! market price used for the deviation is expressed in the same ratio, and a
//! positive `deviation_pct` means the realized average cost beat (was below)
//! the market.

use rust_decimal::Decimal;

use crate::models::fill::Fill;

#[derive(Debug, Clone, PartialEq)]
pub struct RealizedMetrics {
    /// Total source-asset amount spent across all fills.
    pub total_spent: Decimal,
    /// Total destination-asset amount received.
    pub total_received: Decimal,
    /// Source units per destination unit; `None` until something filled,
    /// rendered as "no data", never as NaN.
    pub average_price: Option<Decimal>,
    /// `(market - average) / market * 100`; `None` without an average or a
    /// usable market ratio.
    pub deviation_pct: Option<Decimal>,
}

impl RealizedMetrics {
    pub fn empty() -> Self {
        Self {
            total_spent: Decimal::ZERO,
            total_received: Decimal::ZERO,
            average_price: None,
            deviation_pct: None,
        }
    }
}

/// Fold `fills` into realized metrics.
///
/// `price_ratio` is the current market rate in destination units per source
/// unit (e.g. WBTC per ETH). Fills that carry an explicit destination amount
/// contribute it directly; for the rest the receipt is derived from the
/// source amount and `price_ratio`. With no ratio available, ratio-derived
/// receipts are skipped and only explicit ones count.
pub fn compute_realized(fills: &[Fill], price_ratio: Option<Decimal>) -> RealizedMetrics {
    let mut total_spent = Decimal::ZERO;
    let mut total_received = Decimal::ZERO;

    for fill in fills {
        total_spent += fill.source_amount;

        match fill.dest_amount {
            Some(received) => total_received += received,
            None => {
                if let Some(ratio) = price_ratio {
                    total_received += fill.source_amount * ratio;
                }
            }
        }
    }

    let average_price = if total_received.is_zero() {
        None
    } else {
        Some(total_spent / total_received)
    };

    // Market in the same source-per-dest ratio as the average.
    let market_price = price_ratio.filter(|r| !r.is_zero()).map(|r| Decimal::ONE / r);

    let deviation_pct = match (average_price, market_price) {
        (Some(average), Some(market)) if !market.is_zero() => {
            Some((market - average) / market * Decimal::ONE_HUNDRED)
        }
        _ => None,
    };

    RealizedMetrics {
        total_spent,
        total_received,
        average_price,
        deviation_pct,
    }
}
