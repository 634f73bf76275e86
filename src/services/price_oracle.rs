//! Price Oracle Adapter
//!
//! Proxies the upstream token price feed with a short-lived per-token cache.
//! Local test-net token addresses are remapped to their main-net equivalents
//! before hitting the feed; unknown addresses pass through as-is.
//!
//! The cache is stale-while-revalidate: a hit inside the freshness window is
//! returned directly, a stale hit is returned immediately while a background
//! task refreshes the entry, and only a cold miss makes the caller wait for
//! the upstream round trip.

use moka::future::Cache;
use parking_lot::Mutex;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upstream feed decimals: prices arrive as 18-decimals fixed-point strings.
const PRICE_FEED_DECIMALS: u32 = 18;

/// Base-Sepolia token -> main-net token (the feed only covers main-net).
const TOKEN_MAP: &[(&str, &str)] = &[
    // WETH
    (
        "0x4200000000000000000000000000000000000006",
        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
    ),
    // WBTC
    (
        "0xa1b2c3d4e5f678901234567890abcdefabcdef12",
        "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599",
    ),
];

#[derive(Debug)]
pub enum PriceError {
    /// Transport failure or non-2xx from the feed; retried on the next tick.
    UpstreamUnavailable(String),
    /// Feed responded but had no entry for the requested token.
    PriceNotFound(String),
}

impl std::fmt::Display for PriceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceError::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {}", msg),
            PriceError::PriceNotFound(token) => write!(f, "no price for token {}", token),
        }
    }
}

impl std::error::Error for PriceError {}

#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub price: Decimal,
    pub fetched_at: Instant,
}

impl PriceQuote {
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.fetched_at.elapsed() < window
    }
}

#[derive(Clone)]
pub struct PriceOracleService {
    client: Client,
    api_key: String,
    base_url: String,
    chain_id: u64,
    cache: Cache<String, PriceQuote>,
    /// Addresses with a background refresh in flight; one task per address.
    refreshing: Arc<Mutex<HashSet<String>>>,
    fresh_for: Duration,
}

impl PriceOracleService {
    pub fn new(api_key: String, base_url: String, chain_id: u64, fresh_secs: u64) -> Self {
        // Entries are evicted well past the freshness window so stale values
        // stay servable while a refresh is in flight.
        let cache = Cache::builder()
            .max_capacity(100)
            .time_to_live(Duration::from_secs(fresh_secs * 20))
            .build();

        Self {
            client: Client::new(),
            api_key,
            base_url,
            chain_id,
            cache,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            fresh_for: Duration::from_secs(fresh_secs),
        }
    }

    /// Resolve the price for `token_address` in quote units.
    pub async fn get_price(&self, token_address: &str) -> Result<Decimal, PriceError> {
        let feed_address = map_token(token_address);

        if let Some(quote) = self.cache.get(&feed_address).await {
            if quote.is_fresh(self.fresh_for) {
                tracing::debug!(token = %feed_address, "Price cache hit");
                return Ok(quote.price);
            }

            // Stale: serve the last known price, refresh in the background.
            // Concurrent stale hits collapse onto one refresh per address.
            if self.refreshing.lock().insert(feed_address.clone()) {
                tracing::debug!(token = %feed_address, "Price cache stale, revalidating");
                let this = self.clone();
                let addr = feed_address.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.refresh(&addr).await {
                        tracing::warn!(token = %addr, error = %e, "Background price refresh failed");
                    }
                    this.refreshing.lock().remove(&addr);
                });
            }
            return Ok(quote.price);
        }

        // Cold miss: the caller waits for the upstream round trip.
        self.refresh(&feed_address).await
    }

    async fn refresh(&self, feed_address: &str) -> Result<Decimal, PriceError> {
        let price = self.fetch_upstream(feed_address).await?;
        self.cache
            .insert(
                feed_address.to_string(),
                PriceQuote {
                    price,
                    fetched_at: Instant::now(),
                },
            )
            .await;
        Ok(price)
    }

    async fn fetch_upstream(&self, feed_address: &str) -> Result<Decimal, PriceError> {
        let url = format!(
            "{}/price/v1.1/{}/{}",
            self.base_url, self.chain_id, feed_address
        );

        tracing::info!(token = %feed_address, "Fetching price from upstream feed");

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PriceError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %error_text, "Price feed returned an error");
            return Err(PriceError::UpstreamUnavailable(format!(
                "feed status {}",
                status
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PriceError::UpstreamUnavailable(e.to_string()))?;

        let raw = normalize_price_payload(&payload)
            .ok_or_else(|| PriceError::PriceNotFound(feed_address.to_string()))?;

        rebase_from_feed(&raw)
            .ok_or_else(|| PriceError::UpstreamUnavailable(format!("unparsable price: {}", raw)))
    }
}

/// Map a local-chain token address onto the feed's main-net address.
/// Unmapped addresses are used as-is.
pub fn map_token(address: &str) -> String {
    let lower = address.to_lowercase();
    TOKEN_MAP
        .iter()
        .find(|(local, _)| *local == lower)
        .map(|(_, mainnet)| mainnet.to_string())
        .unwrap_or(lower)
}

/// Normalize the two observed feed shapes into one raw price string:
/// `{"price": "..."}` and `{"<address>": "..."}`.
pub fn normalize_price_payload(payload: &serde_json::Value) -> Option<String> {
    let obj = payload.as_object()?;

    let value = match obj.get("price") {
        Some(v) => v,
        None => obj.values().next()?,
    };

    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rebase an 18-decimals fixed-point string into a plain decimal price.
pub fn rebase_from_feed(raw: &str) -> Option<Decimal> {
    let mut value = Decimal::from_str(raw).ok()?;
    value
        .set_scale(value.scale() + PRICE_FEED_DECIMALS)
        .ok()?;
    Some(value.normalize())
}
