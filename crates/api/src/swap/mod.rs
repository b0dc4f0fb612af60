//! Swap routing abstractions for liquidation.
//!
//! A routing service quotes how to convert seized collateral into the debt
//! asset. Quotes are short-lived: every [`SwapRoute`] carries the instant it
//! stops being executable.

mod liqd;

pub use liqd::LiqdRouter;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Default validity window of a quote.
pub const DEFAULT_ROUTE_TTL: Duration = Duration::from_secs(5);

/// Routing failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// No route satisfies the request constraints.
    #[error("no route from {token_in} to {token_out}")]
    NoRoute { token_in: Address, token_out: Address },

    /// The routing service did not answer before the deadline.
    #[error("route request timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure talking to the routing service.
    #[error("routing transport error: {0}")]
    Transport(String),

    /// The routing service answered with something unusable.
    #[error("invalid route response: {0}")]
    InvalidResponse(String),
}

impl RouteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for RouteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Parameters for requesting a swap route.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    /// Input token address
    pub token_in: Address,
    /// Output token address
    pub token_out: Address,
    /// Input amount (raw, with decimals)
    pub amount_in: U256,
    /// Decimals of input token
    pub decimals_in: u8,
    /// Slippage tolerance in basis points (e.g., 50 = 0.5%)
    pub max_slippage_bps: u16,
    /// Maximum number of hops (1 = direct only)
    pub max_hops: usize,
    /// Venues the route must not touch
    pub excluded_venues: Vec<String>,
}

impl QuoteRequest {
    pub fn new(token_in: Address, token_out: Address, amount_in: U256, decimals_in: u8) -> Self {
        Self {
            token_in,
            token_out,
            amount_in,
            decimals_in,
            max_slippage_bps: 50,
            max_hops: 3,
            excluded_venues: Vec::new(),
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.max_slippage_bps = slippage_bps;
        self
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_excluded_venues(mut self, venues: Vec<String>) -> Self {
        self.excluded_venues = venues;
        self
    }

    /// Whether multi-hop routing is allowed.
    pub fn multi_hop(&self) -> bool {
        self.max_hops > 1
    }
}

/// One swap through one venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapHop {
    /// Venue label (DEX / pool family)
    pub venue: String,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    /// Output of this hop, zero when the venue does not report it
    pub amount_out: U256,
    /// Fee tier (in hundredths of basis points, e.g., 3000 = 0.3%)
    pub fee: u32,
}

/// Quoted path converting `amount_in` of `token_in` into `token_out`.
#[derive(Debug, Clone)]
pub struct SwapRoute {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    /// Expected output amount
    pub expected_output: U256,
    /// Minimum output amount (after slippage)
    pub min_output: U256,
    /// Swap legs, possibly several per path step when split across pools
    pub hops: Vec<SwapHop>,
    /// Token path, `token_in` first and `token_out` last
    pub tokens: Vec<Address>,
    /// Price impact in basis points
    pub price_impact_bps: u32,
    pub quoted_at: Instant,
    pub expires_at: Instant,
}

impl SwapRoute {
    /// Number of path steps (a direct swap is one hop).
    pub fn hop_count(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }

    pub fn is_direct(&self) -> bool {
        self.hop_count() == 1
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Remaining validity, zero once expired.
    pub fn time_left(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Whether any leg goes through one of `venues` (case-insensitive).
    pub fn uses_any_venue(&self, venues: &[String]) -> bool {
        self.hops
            .iter()
            .any(|h| venues.iter().any(|v| v.eq_ignore_ascii_case(&h.venue)))
    }
}

/// Swap routing provider.
#[async_trait]
pub trait SwapRoutingService: Send + Sync {
    /// Router identifier (e.g., "liqd").
    fn name(&self) -> &str;

    /// Candidate routes for `request`, best first when the provider ranks them.
    /// An empty list means no route exists.
    async fn quote(&self, request: &QuoteRequest) -> Result<Vec<SwapRoute>, RouteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(tokens: Vec<Address>, venues: &[&str], ttl: Duration) -> SwapRoute {
        let now = Instant::now();
        SwapRoute {
            token_in: tokens[0],
            token_out: tokens[tokens.len() - 1],
            amount_in: U256::from(1000),
            expected_output: U256::from(990),
            min_output: U256::from(985),
            hops: tokens
                .windows(2)
                .zip(venues)
                .map(|(pair, venue)| SwapHop {
                    venue: venue.to_string(),
                    token_in: pair[0],
                    token_out: pair[1],
                    amount_in: U256::from(1000),
                    amount_out: U256::ZERO,
                    fee: 3000,
                })
                .collect(),
            tokens,
            price_impact_bps: 10,
            quoted_at: now,
            expires_at: now + ttl,
        }
    }

    #[test]
    fn test_quote_request_builder() {
        let request = QuoteRequest::new(Address::ZERO, Address::repeat_byte(1), U256::from(1000), 18)
            .with_max_hops(1)
            .with_slippage_bps(100);

        assert!(!request.multi_hop());
        assert_eq!(request.max_slippage_bps, 100);
    }

    #[test]
    fn test_route_helpers() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(3);

        let direct = route(vec![a, b], &["Orca"], DEFAULT_ROUTE_TTL);
        assert!(direct.is_direct());
        assert!(!direct.is_expired());
        assert!(direct.uses_any_venue(&["orca".to_string()]));

        let two = route(vec![a, c, b], &["Orca", "Raydium"], DEFAULT_ROUTE_TTL);
        assert_eq!(two.hop_count(), 2);
        assert!(!two.uses_any_venue(&["Phoenix".to_string()]));
    }

    #[test]
    fn test_route_expiry() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let expired = route(vec![a, b], &["Orca"], Duration::ZERO);
        assert!(expired.is_expired());
        assert_eq!(expired.time_left(), Duration::ZERO);
    }

    #[test]
    fn test_transient_errors() {
        assert!(RouteError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!RouteError::NoRoute {
            token_in: Address::ZERO,
            token_out: Address::ZERO
        }
        .is_transient());
    }
}
