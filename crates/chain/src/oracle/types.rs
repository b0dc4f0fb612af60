//! Oracle price type.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Exponent of the 18-decimal fixed-point representation.
const WAD_DECIMALS: i32 = 18;

/// Pyth-style price observation: `price × 10^expo` USD per whole token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OraclePrice {
    /// Asset (token mint) the price refers to
    pub asset: Address,
    /// Mantissa
    pub price: i64,
    /// Confidence interval, same exponent as `price`
    pub conf: u64,
    /// Decimal exponent (typically negative)
    pub expo: i32,
    /// Unix timestamp (seconds) of the observation
    pub publish_time: u64,
}

impl OraclePrice {
    /// Price in 18-decimal fixed point. `None` for non-positive prices.
    pub fn price_wad(&self) -> Option<U256> {
        if self.price <= 0 {
            return None;
        }
        Some(scale_to_wad(U256::from(self.price as u64), self.expo))
    }

    /// Confidence interval in 18-decimal fixed point.
    pub fn conf_wad(&self) -> U256 {
        scale_to_wad(U256::from(self.conf), self.expo)
    }

    /// Seconds since publication. Future timestamps count as fresh.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.publish_time)
    }

    pub fn is_stale(&self, max_age_secs: u64, now: u64) -> bool {
        self.age_secs(now) > max_age_secs
    }

    /// Confidence as a share of price, in basis points. `None` for
    /// non-positive prices.
    pub fn confidence_bps(&self) -> Option<u64> {
        if self.price <= 0 {
            return None;
        }
        let bps = (self.conf as u128 * 10_000) / self.price as u128;
        Some(bps.min(u64::MAX as u128) as u64)
    }
}

fn scale_to_wad(mantissa: U256, expo: i32) -> U256 {
    let shift = WAD_DECIMALS + expo;
    if shift >= 0 {
        mantissa.saturating_mul(U256::from(10u64).pow(U256::from(shift as u64)))
    } else {
        mantissa / U256::from(10u64).pow(U256::from((-shift) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(price: i64, conf: u64, expo: i32) -> OraclePrice {
        OraclePrice {
            asset: Address::ZERO,
            price,
            conf,
            expo,
            publish_time: 1_700_000_000,
        }
    }

    #[test]
    fn test_price_wad_scaling() {
        // $150.00 with 8 decimals
        let p = price(15_000_000_000, 0, -8);
        assert_eq!(
            p.price_wad().unwrap(),
            U256::from(150u64) * U256::from(10u64).pow(U256::from(18u64))
        );

        // Positive exponent
        let p = price(2, 0, 3);
        assert_eq!(
            p.price_wad().unwrap(),
            U256::from(2_000u64) * U256::from(10u64).pow(U256::from(18u64))
        );

        // More precision than WAD truncates
        let p = price(123, 0, -20);
        assert_eq!(p.price_wad().unwrap(), U256::from(1u64));
    }

    #[test]
    fn test_non_positive_price() {
        assert!(price(0, 0, -8).price_wad().is_none());
        assert!(price(-5, 0, -8).price_wad().is_none());
        assert!(price(-5, 0, -8).confidence_bps().is_none());
    }

    #[test]
    fn test_staleness() {
        let p = price(1, 0, 0);
        assert_eq!(p.age_secs(1_700_000_120), 120);
        assert!(p.is_stale(60, 1_700_000_120));
        assert!(!p.is_stale(60, 1_700_000_060));
        assert_eq!(p.age_secs(1_699_999_000), 0);
    }

    #[test]
    fn test_confidence_bps() {
        // conf 1.5 on price 100 => 150 bps
        let p = price(10_000, 150, -2);
        assert_eq!(p.confidence_bps(), Some(150));
    }
}
