//! Liqd.ag swap router implementation.
//!
//! Queries the Liqd.ag aggregator for a single best route. Quotes are never
//! cached: each call hits the API and stamps the result with its own expiry.

use super::{QuoteRequest, RouteError, SwapHop, SwapRoute, SwapRoutingService, DEFAULT_ROUTE_TTL};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const DEFAULT_BASE_URL: &str = "https://api.liqd.ag";

/// Liqd.ag swap router.
#[derive(Clone)]
pub struct LiqdRouter {
    client: reqwest::Client,
    base_url: String,
    /// Validity window stamped on every quote
    route_ttl: Duration,
    /// Per-request timeout
    timeout: Duration,
}

impl std::fmt::Debug for LiqdRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiqdRouter")
            .field("base_url", &self.base_url)
            .field("route_ttl", &self.route_ttl)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LiqdRouter {
    pub fn new(timeout: Duration) -> Result<Self, RouteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            route_ttl: DEFAULT_ROUTE_TTL,
            timeout,
        })
    }

    pub fn with_route_ttl(mut self, route_ttl: Duration) -> Self {
        self.route_ttl = route_ttl;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Format raw token amount to human-readable string.
    fn format_amount(amount: U256, decimals: u8) -> String {
        let divisor = U256::from(10u64).pow(U256::from(decimals));
        let whole = amount / divisor;
        let frac = amount % divisor;

        if frac.is_zero() {
            return whole.to_string();
        }

        let frac_str = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
        let trimmed = frac_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }

    /// Parse `"0.5%"` into basis points.
    fn parse_impact_bps(raw: Option<&str>) -> u32 {
        raw.and_then(|s| s.trim().trim_end_matches('%').parse::<f64>().ok())
            .filter(|pct| pct.is_finite() && *pct >= 0.0)
            .map(|pct| (pct * 100.0).round() as u32)
            .unwrap_or(0)
    }

    fn parse_address(raw: &str) -> Result<Address, RouteError> {
        raw.parse()
            .map_err(|e| RouteError::InvalidResponse(format!("address {}: {}", raw, e)))
    }

    fn parse_amount(raw: &str) -> Result<U256, RouteError> {
        raw.parse()
            .map_err(|e| RouteError::InvalidResponse(format!("amount {}: {}", raw, e)))
    }

    /// Fetch route from Liqd API.
    #[instrument(skip(self), fields(token_in = %request.token_in, token_out = %request.token_out))]
    async fn fetch_route(&self, request: &QuoteRequest) -> Result<Option<SwapRoute>, RouteError> {
        let url = format!("{}/v2/route", self.base_url);

        let token_in_str = format!("{}", request.token_in).to_lowercase();
        let token_out_str = format!("{}", request.token_out).to_lowercase();
        let amount_human = Self::format_amount(request.amount_in, request.decimals_in);

        debug!(amount = %amount_human, "Requesting swap route from Liqd");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("tokenIn", token_in_str),
                ("tokenOut", token_out_str),
                ("amountIn", amount_human),
                ("multiHop", request.multi_hop().to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RouteError::Timeout(self.timeout)
                } else {
                    RouteError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                RouteError::Transport(format!("Liqd API {}: {}", status, body))
            } else {
                RouteError::InvalidResponse(format!("Liqd API {}: {}", status, body))
            });
        }

        let api_response: LiqdApiResponse = response.json().await?;
        self.convert_response(request, api_response, Instant::now())
    }

    /// Convert API response to SwapRoute. `Ok(None)` when the API found no path.
    fn convert_response(
        &self,
        request: &QuoteRequest,
        response: LiqdApiResponse,
        quoted_at: Instant,
    ) -> Result<Option<SwapRoute>, RouteError> {
        if !response.success {
            debug!(
                message = response.message.as_deref().unwrap_or("unknown"),
                "Liqd returned no route"
            );
            return Ok(None);
        }

        let Some(execution) = response.execution else {
            return Err(RouteError::InvalidResponse(
                "missing execution info".to_string(),
            ));
        };
        let details = execution.details;

        let mut hops = Vec::new();
        for api_hop in &details.hop_swaps {
            for alloc in api_hop {
                hops.push(SwapHop {
                    venue: format!("liqd:{}", alloc.router_index),
                    token_in: Self::parse_address(&alloc.token_in)?,
                    token_out: Self::parse_address(&alloc.token_out)?,
                    amount_in: Self::parse_amount(&alloc.amount_in)?,
                    amount_out: U256::ZERO,
                    fee: alloc.fee,
                });
            }
        }

        let mut tokens = details
            .path
            .iter()
            .map(|p| Self::parse_address(p))
            .collect::<Result<Vec<_>, _>>()?;
        if tokens.is_empty() {
            tokens.push(request.token_in);
            for hop in &hops {
                if !tokens.contains(&hop.token_out) {
                    tokens.push(hop.token_out);
                }
            }
        }

        Ok(Some(SwapRoute {
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            expected_output: Self::parse_amount(&details.amount_out)?,
            min_output: Self::parse_amount(&details.min_amount_out)?,
            hops,
            tokens,
            price_impact_bps: Self::parse_impact_bps(response.average_price_impact.as_deref()),
            quoted_at,
            expires_at: quoted_at + self.route_ttl,
        }))
    }
}

#[async_trait]
impl SwapRoutingService for LiqdRouter {
    fn name(&self) -> &str {
        "liqd"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Vec<SwapRoute>, RouteError> {
        Ok(self.fetch_route(request).await?.into_iter().collect())
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct LiqdApiResponse {
    success: bool,
    #[serde(rename = "averagePriceImpact")]
    average_price_impact: Option<String>,
    execution: Option<ExecutionInfo>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecutionInfo {
    details: ExecutionDetails,
}

#[derive(Debug, Deserialize)]
struct ExecutionDetails {
    #[serde(default)]
    path: Vec<String>,
    #[serde(rename = "amountOut")]
    amount_out: String,
    #[serde(rename = "minAmountOut")]
    min_amount_out: String,
    #[serde(rename = "hopSwaps", default)]
    hop_swaps: Vec<Vec<ApiAllocation>>,
}

#[derive(Debug, Deserialize)]
struct ApiAllocation {
    #[serde(rename = "tokenIn")]
    token_in: String,
    #[serde(rename = "tokenOut")]
    token_out: String,
    #[serde(rename = "routerIndex")]
    router_index: u8,
    fee: u32,
    #[serde(rename = "amountIn")]
    amount_in: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_A: &str = "0x1111111111111111111111111111111111111111";
    const TOKEN_B: &str = "0x2222222222222222222222222222222222222222";

    fn router() -> LiqdRouter {
        LiqdRouter::new(Duration::from_secs(5)).unwrap()
    }

    fn request() -> QuoteRequest {
        QuoteRequest::new(
            TOKEN_A.parse().unwrap(),
            TOKEN_B.parse().unwrap(),
            U256::from(1_000_000u64),
            6,
        )
    }

    #[test]
    fn test_format_amount() {
        // 1.5 USDC (6 decimals)
        assert_eq!(LiqdRouter::format_amount(U256::from(1_500_000u64), 6), "1.5");

        // 1 ETH (18 decimals)
        let amount = U256::from(1_000_000_000_000_000_000u128);
        assert_eq!(LiqdRouter::format_amount(amount, 18), "1");

        // 0.000001 with 6 decimals keeps leading zeros
        assert_eq!(LiqdRouter::format_amount(U256::from(1u64), 6), "0.000001");
    }

    #[test]
    fn test_parse_price_impact() {
        assert_eq!(LiqdRouter::parse_impact_bps(Some("0.5%")), 50);
        assert_eq!(LiqdRouter::parse_impact_bps(Some("2.25")), 225);
        assert_eq!(LiqdRouter::parse_impact_bps(Some("n/a")), 0);
        assert_eq!(LiqdRouter::parse_impact_bps(None), 0);
    }

    #[test]
    fn test_convert_api_response() {
        let json = format!(
            r#"{{
                "success": true,
                "averagePriceImpact": "0.5%",
                "execution": {{
                    "to": "0x744489ee3d540777a66f2cf297479745e0852f7a",
                    "calldata": "0xabcd",
                    "details": {{
                        "path": ["{a}", "{b}"],
                        "amountIn": "1000000",
                        "amountOut": "500000000000000000",
                        "minAmountOut": "495000000000000000",
                        "hopSwaps": [[{{
                            "tokenIn": "{a}",
                            "tokenOut": "{b}",
                            "routerIndex": 2,
                            "fee": 3000,
                            "amountIn": "1000000",
                            "stable": false
                        }}]]
                    }}
                }}
            }}"#,
            a = TOKEN_A,
            b = TOKEN_B
        );

        let response: LiqdApiResponse = serde_json::from_str(&json).unwrap();
        let now = Instant::now();
        let route = router()
            .convert_response(&request(), response, now)
            .unwrap()
            .unwrap();

        assert!(route.is_direct());
        assert_eq!(route.hops[0].venue, "liqd:2");
        assert_eq!(route.price_impact_bps, 50);
        assert_eq!(route.min_output, U256::from(495_000_000_000_000_000u128));
        assert_eq!(route.expires_at, now + DEFAULT_ROUTE_TTL);
    }

    #[test]
    fn test_unsuccessful_response_is_no_route() {
        let response: LiqdApiResponse =
            serde_json::from_str(r#"{ "success": false, "message": "no liquidity" }"#).unwrap();
        assert!(router()
            .convert_response(&request(), response, Instant::now())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_live_quote() {
        let routes = router().quote(&request()).await.unwrap();
        assert!(routes.len() <= 1);
    }
}
