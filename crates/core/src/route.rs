//! Swap route acquisition and validation.

use alloy::primitives::{Address, U256};
use alpha_liquidator_api::{QuoteRequest, RouteError, SwapRoute, SwapRoutingService};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::config::RoutingConfig;
use crate::selector::LiquidationCandidate;
use crate::u256_math::apply_basis_points;

/// Queries the routing service and keeps only routes that are safe to execute.
#[derive(Clone)]
pub struct RouteFinder {
    service: Arc<dyn SwapRoutingService>,
    config: RoutingConfig,
    call_timeout: Duration,
}

impl std::fmt::Debug for RouteFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteFinder")
            .field("service", &self.service.name())
            .field("max_hops", &self.config.max_hops)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl RouteFinder {
    pub fn new(
        service: Arc<dyn SwapRoutingService>,
        config: RoutingConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            service,
            config,
            call_timeout,
        }
    }

    /// Route converting the candidate's seized collateral into its debt asset,
    /// with the configured slippage bound.
    pub async fn route_for(&self, candidate: &LiquidationCandidate) -> Result<SwapRoute, RouteError> {
        self.find_route(
            candidate.asset.mint,
            candidate.asset.seize_amount,
            candidate.asset.decimals,
            candidate.liability.mint,
            self.config.max_slippage_bps,
        )
        .await
    }

    /// Best valid route for `amount` of `input` into `output`.
    ///
    /// The returned route's `min_output` is never looser than
    /// `expected_output × (1 − max_slippage_bps)`.
    #[instrument(skip(self), fields(service = self.service.name()))]
    pub async fn find_route(
        &self,
        input: Address,
        amount: U256,
        input_decimals: u8,
        output: Address,
        max_slippage_bps: u16,
    ) -> Result<SwapRoute, RouteError> {
        let request = QuoteRequest::new(input, output, amount, input_decimals)
            .with_slippage_bps(max_slippage_bps)
            .with_max_hops(self.config.max_hops)
            .with_excluded_venues(self.config.excluded_venues.clone());

        let routes = tokio::time::timeout(self.call_timeout, self.service.quote(&request))
            .await
            .map_err(|_| RouteError::Timeout(self.call_timeout))??;

        let quoted = routes.len();
        let now = Instant::now();
        let best = routes
            .into_iter()
            .filter(|route| self.is_acceptable(&request, route, now))
            .map(|mut route| {
                let floor = apply_basis_points(route.expected_output, max_slippage_bps);
                route.min_output = route.min_output.max(floor);
                route
            })
            .max_by(|a, b| a.expected_output.cmp(&b.expected_output));

        match best {
            Some(route) => {
                debug!(
                    quoted = quoted,
                    hops = route.hop_count(),
                    expected_output = %route.expected_output,
                    min_output = %route.min_output,
                    price_impact_bps = route.price_impact_bps,
                    "Route selected"
                );
                Ok(route)
            }
            None => {
                debug!(quoted = quoted, "No acceptable route");
                Err(RouteError::NoRoute {
                    token_in: input,
                    token_out: output,
                })
            }
        }
    }

    fn is_acceptable(&self, request: &QuoteRequest, route: &SwapRoute, now: Instant) -> bool {
        let reason = if route.token_in != request.token_in || route.token_out != request.token_out {
            Some("token mismatch")
        } else if route.amount_in > request.amount_in {
            Some("spends more than requested")
        } else if route.hop_count() == 0 || route.hop_count() > self.config.max_hops {
            Some("hop count out of bounds")
        } else if route.price_impact_bps > self.config.max_price_impact_bps {
            Some("price impact too high")
        } else if route.uses_any_venue(&self.config.excluded_venues) {
            Some("excluded venue")
        } else if route.is_expired_at(now) {
            Some("already expired")
        } else if route.expected_output.is_zero() {
            Some("zero output")
        } else {
            None
        };

        if let Some(reason) = reason {
            warn!(
                reason = reason,
                hops = route.hop_count(),
                price_impact_bps = route.price_impact_bps,
                "Discarding route"
            );
        }
        reason.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{route, ScriptedRouter};

    const IN: Address = Address::repeat_byte(0x01);
    const MID: Address = Address::repeat_byte(0x02);
    const OUT: Address = Address::repeat_byte(0x03);

    fn finder(router: ScriptedRouter, config: RoutingConfig) -> RouteFinder {
        RouteFinder::new(Arc::new(router), config, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_picks_largest_valid_output() {
        let router = ScriptedRouter::new();
        router.push(Ok(vec![
            route(&[IN, OUT], 1_000, 950, &["Orca"], Duration::from_secs(5)),
            route(&[IN, MID, OUT], 1_000, 990, &["Orca", "Raydium"], Duration::from_secs(5)),
            // Best output but too many hops for max_hops = 2
            route(&[IN, MID, IN, OUT], 1_000, 999, &["A", "B", "C"], Duration::from_secs(5)),
        ]));

        let config = RoutingConfig {
            max_hops: 2,
            ..Default::default()
        };
        let best = finder(router, config)
            .find_route(IN, U256::from(1_000u64), 6, OUT, 100)
            .await
            .unwrap();
        assert_eq!(best.expected_output, U256::from(990u64));
    }

    #[tokio::test]
    async fn test_min_output_tightened_to_slippage() {
        let router = ScriptedRouter::new();
        let mut loose = route(&[IN, OUT], 1_000, 10_000, &["Orca"], Duration::from_secs(5));
        loose.min_output = U256::from(5_000u64);
        router.push(Ok(vec![loose]));

        let best = finder(router, RoutingConfig::default())
            .find_route(IN, U256::from(1_000u64), 6, OUT, 100)
            .await
            .unwrap();
        assert_eq!(best.min_output, U256::from(9_900u64));
    }

    #[tokio::test]
    async fn test_rejects_invalid_routes() {
        let router = ScriptedRouter::new();
        let mut impact = route(&[IN, OUT], 1_000, 900, &["Orca"], Duration::from_secs(5));
        impact.price_impact_bps = 5_000;
        router.push(Ok(vec![
            impact,
            route(&[IN, OUT], 1_000, 900, &["Phoenix"], Duration::from_secs(5)),
            route(&[IN, OUT], 1_000, 900, &["Orca"], Duration::ZERO),
            route(&[IN, MID], 1_000, 900, &["Orca"], Duration::from_secs(5)),
        ]));

        let config = RoutingConfig {
            excluded_venues: vec!["phoenix".to_string()],
            ..Default::default()
        };
        let err = finder(router, config)
            .find_route(IN, U256::from(1_000u64), 6, OUT, 100)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::NoRoute {
                token_in: IN,
                token_out: OUT
            }
        );
    }

    #[tokio::test]
    async fn test_empty_quote_is_no_route() {
        let router = ScriptedRouter::new();
        router.push(Ok(vec![]));
        let err = finder(router, RoutingConfig::default())
            .find_route(IN, U256::from(1_000u64), 6, OUT, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::NoRoute { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let router = ScriptedRouter::new().with_latency(Duration::from_secs(2));
        router.push(Ok(vec![route(&[IN, OUT], 1_000, 900, &["Orca"], Duration::from_secs(5))]));

        let err = finder(router, RoutingConfig::default())
            .find_route(IN, U256::from(1_000u64), 6, OUT, 100)
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::Timeout(Duration::from_millis(200)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_service_error_propagates() {
        let router = ScriptedRouter::new();
        router.push(Err(RouteError::Transport("connection refused".into())));
        let err = finder(router, RoutingConfig::default())
            .find_route(IN, U256::from(1_000u64), 6, OUT, 100)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
