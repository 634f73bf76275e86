use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PriceQuery {
    pub token: Option<String>,
}

/// Price in quote units as a decimal string, already rebased from the
/// upstream 18-decimals fixed-point representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceResponse {
    pub price: String,
}
