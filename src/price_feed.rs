//! Oracle price lookup for slippage guardrails.
//!
//! Only consulted when the caller supplies slippage without an oracle
//! price. The returned price is a reference; the on-chain program applies
//! its own oracle when it fills the request.

use rust_decimal::Decimal;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::PriceFeedConfig;

#[derive(Debug, Error)]
pub enum PriceFeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No price for {0}")]
    Missing(Pubkey),

    #[error("Unparseable price {raw:?} for {mint}")]
    Invalid { mint: Pubkey, raw: String },

    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    data: HashMap<String, Option<PriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    price: serde_json::Value,
}

/// Jupiter price API client
#[derive(Debug, Clone)]
pub struct PriceFeed {
    client: reqwest::Client,
    url: String,
}

impl PriceFeed {
    pub fn new(config: &PriceFeedConfig) -> Result<Self, PriceFeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// USD price of `mint`
    pub async fn price_usd(&self, mint: &Pubkey) -> Result<Decimal, PriceFeedError> {
        let body = self
            .client
            .get(&self.url)
            .query(&[("ids", mint.to_string())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let price = parse_price_response(&body, mint)?;
        debug!(%mint, %price, "Fetched oracle price");
        Ok(price)
    }
}

/// Extract `mint`'s price from a `{"data": {mint: {"price": ...}}}` body.
/// Prices may be encoded as strings or numbers.
pub fn parse_price_response(body: &str, mint: &Pubkey) -> Result<Decimal, PriceFeedError> {
    let response: PriceResponse = serde_json::from_str(body)?;
    let entry = response
        .data
        .get(&mint.to_string())
        .and_then(Option::as_ref)
        .ok_or(PriceFeedError::Missing(*mint))?;

    let raw = match &entry.price {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let price = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| PriceFeedError::Invalid {
            mint: *mint,
            raw: raw.clone(),
        })?;
    if price <= Decimal::ZERO {
        return Err(PriceFeedError::Invalid { mint: *mint, raw });
    }
    Ok(price)
}
