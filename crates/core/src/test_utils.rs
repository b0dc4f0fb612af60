//! Shared fixtures for engine tests.

use alloy::primitives::{Address, U256};
use alpha_liquidator_api::{QuoteRequest, RouteError, SwapHop, SwapRoute, SwapRoutingService};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Route along `tokens` through `venues`, quoted now and valid for `ttl`.
pub fn route(
    tokens: &[Address],
    amount_in: u64,
    expected_output: u64,
    venues: &[&str],
    ttl: Duration,
) -> SwapRoute {
    let now = Instant::now();
    SwapRoute {
        token_in: tokens[0],
        token_out: tokens[tokens.len() - 1],
        amount_in: U256::from(amount_in),
        expected_output: U256::from(expected_output),
        min_output: U256::from(expected_output),
        hops: tokens
            .windows(2)
            .zip(venues)
            .map(|(pair, venue)| SwapHop {
                venue: venue.to_string(),
                token_in: pair[0],
                token_out: pair[1],
                amount_in: U256::from(amount_in),
                amount_out: U256::ZERO,
                fee: 3000,
            })
            .collect(),
        tokens: tokens.to_vec(),
        price_impact_bps: 10,
        quoted_at: now,
        expires_at: now + ttl,
    }
}

/// Routing service that replays scripted answers, then falls back to a
/// direct route with a fixed output.
pub struct ScriptedRouter {
    script: Mutex<VecDeque<Result<Vec<SwapRoute>, RouteError>>>,
    fallback_output: Option<U256>,
    ttl: Duration,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedRouter {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback_output: None,
            ttl: Duration::from_secs(5),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every unscripted request with a direct route yielding `output`.
    pub fn always(output: U256) -> Self {
        Self {
            fallback_output: Some(output),
            ..Self::new()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, answer: Result<Vec<SwapRoute>, RouteError>) {
        self.script.lock().push_back(answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwapRoutingService for ScriptedRouter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Vec<SwapRoute>, RouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(answer) = self.script.lock().pop_front() {
            return answer;
        }

        match self.fallback_output {
            Some(output) => {
                let now = Instant::now();
                Ok(vec![SwapRoute {
                    token_in: request.token_in,
                    token_out: request.token_out,
                    amount_in: request.amount_in,
                    expected_output: output,
                    min_output: output,
                    hops: vec![SwapHop {
                        venue: "Orca".to_string(),
                        token_in: request.token_in,
                        token_out: request.token_out,
                        amount_in: request.amount_in,
                        amount_out: output,
                        fee: 3000,
                    }],
                    tokens: vec![request.token_in, request.token_out],
                    price_impact_bps: 10,
                    quoted_at: now,
                    expires_at: now + self.ttl,
                }])
            }
            None => Ok(vec![]),
        }
    }
}
