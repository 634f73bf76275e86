//! Fill Ledger
//!
//! Two collaborators around the same bounded fill window:
//!
//! * [`FillStore`]: the in-memory, newest-first store behind `GET /fill` /
//!   `POST /fill`. Capped at the most recent [`FILL_CAPACITY`] records so the
//!   feed never grows unbounded; both writers (the external notifier and the
//!   optional history sync job) go through its guarded methods.
//! * [`FillLedgerService`]: fetches the recent order-book fill history for
//!   the vault's maker address from the upstream feed and normalizes
//!   timestamps and amounts into [`Fill`] records.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::VecDeque;
use std::str::FromStr;

use crate::models::fill::{Fill, FillRow};

/// Most recent fills kept; bounds memory and render cost.
pub const FILL_CAPACITY: usize = 20;

#[derive(Debug)]
pub enum FillError {
    /// Transport failure or non-2xx from the history feed.
    UpstreamUnavailable(String),
}

impl std::fmt::Display for FillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillError::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {}", msg),
        }
    }
}

impl std::error::Error for FillError {}

/// Bounded, newest-first fill window.
#[derive(Default)]
pub struct FillStore {
    inner: RwLock<VecDeque<Fill>>,
}

impl FillStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend one fill, dropping the oldest past capacity.
    pub fn push(&self, fill: Fill) {
        let mut fills = self.inner.write();
        fills.push_front(fill);
        fills.truncate(FILL_CAPACITY);
    }

    /// Replace the whole window with a freshly synced history (newest first).
    pub fn replace_all(&self, mut fills: Vec<Fill>) {
        fills.truncate(FILL_CAPACITY);
        *self.inner.write() = fills.into();
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.inner.read().iter().cloned().collect()
    }

    /// Rows for rendering: slices of one order share its hash, so each row
    /// gets a synthesized unique key.
    pub fn rows(&self) -> Vec<FillRow> {
        self.inner
            .read()
            .iter()
            .enumerate()
            .map(|(idx, fill)| FillRow {
                row_key: format!("{}-{}", fill.id, idx),
                fill: fill.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Raw upstream fill record. Field names vary between feed iterations, so
/// aliases fold them onto one shape.
#[derive(Debug, Deserialize)]
struct RawFillRecord {
    #[serde(alias = "orderHash")]
    id: String,
    #[serde(alias = "amount", alias = "makerAmount")]
    source_amount: String,
    #[serde(alias = "takerAmount")]
    dest_amount: Option<String>,
    #[serde(alias = "destAsset")]
    dest_asset: Option<String>,
    chain: Option<String>,
    #[serde(alias = "time", alias = "createDateTime")]
    executed_at: String,
}

/// Client for the upstream maker fill-history feed.
#[derive(Clone)]
pub struct FillLedgerService {
    client: Client,
    base_url: String,
}

impl FillLedgerService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Fetch recent fills recorded against `maker_address` (the vault
    /// contract, not the end user), newest first, capped at
    /// [`FILL_CAPACITY`]. An empty history is a valid state, not an error.
    pub async fn list_fills(&self, maker_address: &str) -> Result<Vec<Fill>, FillError> {
        let url = format!("{}/history", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[("maker", maker_address)])
            .send()
            .await
            .map_err(|e| FillError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(%status, maker = %maker_address, "Fill history feed returned an error");
            return Err(FillError::UpstreamUnavailable(format!(
                "feed status {}",
                status
            )));
        }

        let raw: Vec<RawFillRecord> = response
            .json()
            .await
            .map_err(|e| FillError::UpstreamUnavailable(e.to_string()))?;

        Ok(normalize_fills(raw))
    }
}

/// Normalize raw records: parse amounts and timestamps, drop rows that
/// cannot be parsed, sort newest first, cap the window.
fn normalize_fills(raw: Vec<RawFillRecord>) -> Vec<Fill> {
    let mut fills: Vec<Fill> = raw
        .into_iter()
        .filter_map(|record| {
            let source_amount = match Decimal::from_str(&record.source_amount) {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(id = %record.id, amount = %record.source_amount,
                        "Skipping fill with unparsable amount");
                    return None;
                }
            };

            let executed_at = match DateTime::parse_from_rfc3339(&record.executed_at) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(_) => {
                    tracing::warn!(id = %record.id, time = %record.executed_at,
                        "Skipping fill with unparsable timestamp");
                    return None;
                }
            };

            let dest_amount = record
                .dest_amount
                .as_deref()
                .and_then(|v| Decimal::from_str(v).ok());

            Some(Fill {
                id: record.id,
                source_amount,
                dest_amount,
                dest_asset: record.dest_asset.unwrap_or_else(|| "WBTC".to_string()),
                chain: record.chain.unwrap_or_else(|| "base-sepolia".to_string()),
                executed_at,
            })
        })
        .collect();

    fills.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
    fills.truncate(FILL_CAPACITY);
    fills
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(id: &str, amount: Decimal, secs: i64) -> Fill {
        Fill {
            id: id.to_string(),
            source_amount: amount,
            dest_amount: None,
            dest_asset: "WBTC".to_string(),
            chain: "base-sepolia".to_string(),
            executed_at: DateTime::from_timestamp(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_store_newest_first() {
        let store = FillStore::new();
        store.push(fill("0xaa", dec!(0.01), 100));
        store.push(fill("0xbb", dec!(0.02), 200));

        let fills = store.fills();
        assert_eq!(fills[0].id, "0xbb");
        assert_eq!(fills[1].id, "0xaa");
    }

    #[test]
    fn test_store_caps_at_capacity() {
        let store = FillStore::new();
        for i in 0..(FILL_CAPACITY + 5) {
            store.push(fill(&format!("0x{:02x}", i), dec!(0.01), i as i64));
        }

        assert_eq!(store.len(), FILL_CAPACITY);
        // Newest survives, oldest dropped
        assert_eq!(store.fills()[0].id, format!("0x{:02x}", FILL_CAPACITY + 4));
    }

    #[test]
    fn test_row_keys_unique_for_repeated_hash() {
        let store = FillStore::new();
        store.push(fill("0xabc", dec!(0.01), 100));
        store.push(fill("0xabc", dec!(0.01), 200));

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].row_key, rows[1].row_key);
        assert_eq!(rows[0].row_key, "0xabc-0");
        assert_eq!(rows[1].row_key, "0xabc-1");
    }

    #[test]
    fn test_replace_all_truncates() {
        let store = FillStore::new();
        let many: Vec<Fill> = (0..30)
            .map(|i| fill(&format!("0x{:02x}", i), dec!(0.01), 1000 - i as i64))
            .collect();
        store.replace_all(many);
        assert_eq!(store.len(), FILL_CAPACITY);
    }

    #[test]
    fn test_normalize_both_upstream_shapes() {
        let raw: Vec<RawFillRecord> = serde_json::from_value(serde_json::json!([
            {
                "id": "0xaaa",
                "amount": "0.01",
                "chain": "base-sepolia",
                "time": "2026-08-20T10:00:00Z"
            },
            {
                "orderHash": "0xbbb",
                "makerAmount": "0.02",
                "takerAmount": "0.0004",
                "createDateTime": "2026-08-20T11:00:00Z"
            }
        ]))
        .unwrap();

        let fills = normalize_fills(raw);
        assert_eq!(fills.len(), 2);
        // Newest first
        assert_eq!(fills[0].id, "0xbbb");
        assert_eq!(fills[0].source_amount, dec!(0.02));
        assert_eq!(fills[0].dest_amount, Some(dec!(0.0004)));
        assert_eq!(fills[1].id, "0xaaa");
        assert_eq!(fills[1].dest_amount, None);
    }

    #[test]
    fn test_normalize_drops_bad_rows() {
        let raw: Vec<RawFillRecord> = serde_json::from_value(serde_json::json!([
            { "id": "0xaaa", "amount": "bogus", "time": "2026-08-20T10:00:00Z" },
            { "id": "0xbbb", "amount": "0.01", "time": "not a timestamp" },
            { "id": "0xccc", "amount": "0.01", "time": "2026-08-20T10:00:00Z" }
        ]))
        .unwrap();

        let fills = normalize_fills(raw);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].id, "0xccc");
    }

    #[test]
    fn test_empty_history_is_not_an_error() {
        let fills = normalize_fills(vec![]);
        assert!(fills.is_empty());
    }
}
