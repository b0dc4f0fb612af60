//! Pyth Hermes price client.

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{OracleFeed, OraclePrice};
use crate::error::GatewayError;

const DEFAULT_HERMES_URL: &str = "https://hermes.pyth.network";

/// Pyth Hermes client mapping token mints to Pyth feed ids.
#[derive(Clone)]
pub struct HermesOracle {
    client: reqwest::Client,
    base_url: String,
    /// mint -> hex feed id (without 0x)
    feeds: HashMap<Address, String>,
}

impl std::fmt::Debug for HermesOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HermesOracle")
            .field("base_url", &self.base_url)
            .field("feeds", &self.feeds.len())
            .finish()
    }
}

impl HermesOracle {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_HERMES_URL.to_string(),
            feeds: HashMap::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Register the Pyth feed id pricing `asset`.
    pub fn with_feed(mut self, asset: Address, feed_id: impl AsRef<str>) -> Self {
        let id = feed_id.as_ref().trim_start_matches("0x").to_lowercase();
        self.feeds.insert(asset, id);
        self
    }

    fn convert(asset: Address, feed_id: &str, response: HermesResponse) -> Result<OraclePrice, GatewayError> {
        let update = response
            .parsed
            .into_iter()
            .find(|u| u.id.trim_start_matches("0x").eq_ignore_ascii_case(feed_id))
            .ok_or_else(|| GatewayError::NotFound(format!("feed {} missing from response", feed_id)))?;

        let price = update
            .price
            .price
            .parse::<i64>()
            .map_err(|e| GatewayError::InvalidData(format!("price: {}", e)))?;
        let conf = update
            .price
            .conf
            .parse::<u64>()
            .map_err(|e| GatewayError::InvalidData(format!("conf: {}", e)))?;

        Ok(OraclePrice {
            asset,
            price,
            conf,
            expo: update.price.expo,
            publish_time: update.price.publish_time.max(0) as u64,
        })
    }
}

#[async_trait]
impl OracleFeed for HermesOracle {
    #[instrument(skip(self), fields(asset = %asset))]
    async fn get_price(&self, asset: Address) -> Result<OraclePrice, GatewayError> {
        let feed_id = self
            .feeds
            .get(&asset)
            .ok_or_else(|| GatewayError::NotFound(format!("no Pyth feed for {}", asset)))?;

        let url = format!("{}/v2/updates/price/latest", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("ids[]", feed_id.as_str()), ("parsed", "true")])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        operation: "hermes_price",
                        after: Duration::ZERO,
                    }
                } else {
                    GatewayError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                GatewayError::Transport(format!("Hermes {}: {}", status, body))
            } else {
                GatewayError::NotFound(format!("Hermes {}: {}", status, body))
            });
        }

        let body: HermesResponse = response.json().await?;
        let price = Self::convert(asset, feed_id, body)?;

        debug!(
            price = price.price,
            expo = price.expo,
            publish_time = price.publish_time,
            "Fetched Pyth price"
        );
        Ok(price)
    }
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct HermesResponse {
    #[serde(default)]
    parsed: Vec<ParsedUpdate>,
}

#[derive(Debug, Deserialize)]
struct ParsedUpdate {
    id: String,
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}
