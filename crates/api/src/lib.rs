//! Swap routing clients for liquidation execution.
//!
//! This crate provides:
//! - Route types and the `SwapRoutingService` interface
//! - Liqd.ag: aggregator client quoting collateral-to-debt swaps

pub mod swap;

pub use swap::{
    LiqdRouter, QuoteRequest, RouteError, SwapHop, SwapRoute, SwapRoutingService,
    DEFAULT_ROUTE_TTL,
};
