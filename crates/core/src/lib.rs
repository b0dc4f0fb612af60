//! Liquidation engine core.
//!
//! This crate provides the engine pipeline for a lending protocol liquidator:
//! - Health evaluation of lending accounts under maintenance weights
//! - Batched, bounded-concurrency account scanning
//! - Candidate selection and ranking by estimated liquidation bonus
//! - Swap route acquisition for seized collateral
//! - Locked, retried transaction execution
//! - The cycle loop tying them together

pub mod config;
mod engine;
mod error;
mod health;
mod liquidator;
mod lock;
mod metrics;
mod route;
mod scanner;
mod selector;
pub mod u256_math;

#[cfg(test)]
mod test_utils;

pub use config::{BotConfig, ConfigError};
pub use engine::{Engine, EngineState};
pub use error::{Error, Result};
pub use health::{BalanceValue, HealthCalculator, HealthError, HealthRatio, HealthSnapshot};
pub use liquidator::{ExecutionOutcome, ExecutionResult, LiquidationExecutor};
pub use lock::{ExecutionGuard, ExecutionLocks};
pub use metrics::{CycleMetrics, EngineMetrics, MetricsSnapshot};
pub use route::RouteFinder;
pub use scanner::{AccountScanner, CycleSnapshot, ScanOutcome};
pub use selector::{
    AccountFilter, BonusEstimate, BonusEstimator, CandidateSelector, CollateralLeg, DiscountBonus,
    LiabilityLeg, LiquidationCandidate,
};
