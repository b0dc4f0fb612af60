//! Oracle price feeds.
//!
//! - [`StaticOracle`]: in-memory prices, loaded from a ledger snapshot or set
//!   directly (paper trading, tests)
//! - [`HermesOracle`]: Pyth Hermes HTTP endpoint

mod hermes;
mod types;

pub use hermes::HermesOracle;
pub use types::OraclePrice;

use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::GatewayError;

/// Source of asset prices.
#[async_trait]
pub trait OracleFeed: Send + Sync {
    /// Latest price for `asset` (token mint).
    async fn get_price(&self, asset: Address) -> Result<OraclePrice, GatewayError>;
}

/// Prices held in memory.
#[derive(Debug, Default)]
pub struct StaticOracle {
    prices: DashMap<Address, OraclePrice>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_prices(prices: impl IntoIterator<Item = OraclePrice>) -> Self {
        let oracle = Self::new();
        for price in prices {
            oracle.set_price(price);
        }
        oracle
    }

    /// Insert or replace the price of `price.asset`.
    pub fn set_price(&self, price: OraclePrice) {
        self.prices.insert(price.asset, price);
    }

    pub fn remove(&self, asset: &Address) {
        self.prices.remove(asset);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[async_trait]
impl OracleFeed for StaticOracle {
    async fn get_price(&self, asset: Address) -> Result<OraclePrice, GatewayError> {
        self.prices
            .get(&asset)
            .map(|p| *p)
            .ok_or_else(|| GatewayError::NotFound(format!("no price for {}", asset)))
    }
}
