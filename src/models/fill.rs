use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One executed trade slice, normalized from the upstream order-book history.
///
/// `id` is the order hash the fill settled against; an order that fills in
/// multiple slices repeats the same `id`, so rows rendered to clients carry a
/// synthesized `row_key` instead (see [`FillRow`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub source_amount: Decimal,
    /// Destination amount when the upstream reports it; derived from the
    /// market ratio by the metrics engine otherwise.
    pub dest_amount: Option<Decimal>,
    pub dest_asset: String,
    pub chain: String,
    pub executed_at: DateTime<Utc>,
}

/// A fill as served over `GET /fill`: the record plus a unique row key.
#[derive(Debug, Clone, Serialize)]
pub struct FillRow {
    #[serde(flatten)]
    pub fill: Fill,
    pub row_key: String,
}

/// Body accepted by `POST /fill` (pushed by the external orchestrator
/// notifier, not by the UI).
#[derive(Debug, Clone, Deserialize)]
pub struct PostFillRequest {
    pub id: String,
    #[serde(alias = "source_amount")]
    pub amount: Decimal,
    pub dest_amount: Option<Decimal>,
    #[serde(default = "default_dest_asset")]
    pub dest_asset: String,
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(alias = "executed_at")]
    pub time: Option<DateTime<Utc>>,
}

fn default_dest_asset() -> String {
    "WBTC".to_string()
}

fn default_chain() -> String {
    "base-sepolia".to_string()
}

impl PostFillRequest {
    pub fn into_fill(self) -> Fill {
        Fill {
            id: self.id,
            source_amount: self.amount,
            dest_amount: self.dest_amount,
            dest_asset: self.dest_asset,
            chain: self.chain,
            executed_at: self.time.unwrap_or_else(Utc::now),
        }
    }
}
