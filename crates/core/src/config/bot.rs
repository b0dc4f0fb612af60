//! Configuration management with profile support.
//!
//! Provides configuration for every engine stage with support for named
//! profiles (testing, production, aggressive), TOML files, and environment
//! overrides for the account lists.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::u256_math::f64_to_wad;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid address {value:?} in {var}")]
    BadAddress { var: &'static str, value: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Main configuration structure containing all engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Account fetching
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Health evaluation bounds
    #[serde(default)]
    pub health: HealthConfig,

    /// Candidate selection policy
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Swap route constraints
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Transaction submission
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Cycle scheduling
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Account scanning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Account batches fetched concurrently
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Accounts per fetch call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Bank configs are re-read when older than this (seconds)
    #[serde(default = "default_bank_refresh")]
    pub bank_refresh_secs: u64,
}

fn default_fetch_concurrency() -> usize {
    8
}
fn default_batch_size() -> usize {
    100
}
fn default_bank_refresh() -> u64 {
    60
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            batch_size: default_batch_size(),
            bank_refresh_secs: default_bank_refresh(),
        }
    }
}

impl ScannerConfig {
    pub fn bank_refresh(&self) -> Duration {
        Duration::from_secs(self.bank_refresh_secs)
    }
}

/// Health evaluation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Prices older than this invalidate the evaluation (seconds)
    #[serde(default = "default_max_price_age")]
    pub max_price_age_secs: u64,

    /// Maximum oracle confidence interval relative to price (bps)
    #[serde(default = "default_max_confidence")]
    pub max_confidence_bps: u64,
}

fn default_max_price_age() -> u64 {
    60
}
fn default_max_confidence() -> u64 {
    500
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_price_age_secs: default_max_price_age(),
            max_confidence_bps: default_max_confidence(),
        }
    }
}

/// Candidate selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Minimum estimated bonus to attempt a liquidation (USD)
    #[serde(default)]
    pub min_bonus_usd: f64,

    /// Share of collateral seizable in one liquidation (bps)
    #[serde(default = "default_close_factor")]
    pub close_factor_bps: u32,

    /// If non-empty, only these accounts are considered
    #[serde(default)]
    pub whitelist: Vec<Address>,

    /// Accounts never considered (wins over whitelist)
    #[serde(default)]
    pub blacklist: Vec<Address>,
}

fn default_close_factor() -> u32 {
    5_000
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_bonus_usd: 0.0,
            close_factor_bps: default_close_factor(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

impl SelectionConfig {
    pub fn min_bonus_wad(&self) -> U256 {
        f64_to_wad(self.min_bonus_usd)
    }
}

/// Swap route constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum slippage tolerance (bps)
    #[serde(default = "default_max_slippage")]
    pub max_slippage_bps: u16,

    /// Maximum path steps
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Maximum accepted price impact (bps)
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact_bps: u32,

    /// Validity window of a quote (milliseconds)
    #[serde(default = "default_route_ttl")]
    pub route_ttl_ms: u64,

    /// Venues routes must not touch
    #[serde(default)]
    pub excluded_venues: Vec<String>,
}

fn default_max_slippage() -> u16 {
    100
}
fn default_max_hops() -> usize {
    3
}
fn default_max_price_impact() -> u32 {
    300
}
fn default_route_ttl() -> u64 {
    5_000
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: default_max_slippage(),
            max_hops: default_max_hops(),
            max_price_impact_bps: default_max_price_impact(),
            route_ttl_ms: default_route_ttl(),
            excluded_venues: Vec::new(),
        }
    }
}

impl RoutingConfig {
    pub fn route_ttl(&self) -> Duration {
        Duration::from_millis(self.route_ttl_ms)
    }
}

/// Transaction submission parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Retries after the first submission attempt (transient errors only)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay (milliseconds), doubled per attempt
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Retry delay cap (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Deadline for every external call (milliseconds)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Simulate only, never submit
    #[serde(default)]
    pub dry_run: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff() -> u64 {
    200
}
fn default_max_backoff() -> u64 {
    1_600
}
fn default_call_timeout() -> u64 {
    5_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            call_timeout_ms: default_call_timeout(),
            dry_run: false,
        }
    }
}

impl ExecutionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Delay before retry `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Cycle scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between cycle starts (milliseconds)
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_ms: u64,

    /// Liquidations in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
}

fn default_cycle_interval() -> u64 {
    2_000
}
fn default_max_concurrent() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval(),
            max_concurrent_executions: default_max_concurrent(),
        }
    }
}

impl EngineConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            scanner: ScannerConfig::default(),
            health: HealthConfig::default(),
            selection: SelectionConfig::default(),
            routing: RoutingConfig::default(),
            execution: ExecutionConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Permissive profile for paper trading: dry-run, no bonus floor.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scanner: ScannerConfig {
                fetch_concurrency: 4,
                batch_size: 50,
                bank_refresh_secs: 30,
            },
            health: HealthConfig {
                max_price_age_secs: 120,
                max_confidence_bps: 1_000,
            },
            selection: SelectionConfig {
                min_bonus_usd: 0.0,
                ..Default::default()
            },
            routing: RoutingConfig {
                max_slippage_bps: 500,
                max_price_impact_bps: 1_000,
                ..Default::default()
            },
            execution: ExecutionConfig {
                dry_run: true,
                ..Default::default()
            },
            engine: EngineConfig {
                cycle_interval_ms: 5_000,
                max_concurrent_executions: 2,
            },
        }
    }

    /// Conservative profile for production.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            scanner: ScannerConfig::default(),
            health: HealthConfig::default(),
            selection: SelectionConfig {
                min_bonus_usd: 1.0, // $1 minimum bonus
                ..Default::default()
            },
            routing: RoutingConfig {
                max_slippage_bps: 50,
                max_price_impact_bps: 200,
                ..Default::default()
            },
            execution: ExecutionConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Fast-cycling profile that accepts thinner bonuses.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            scanner: ScannerConfig {
                fetch_concurrency: 16,
                batch_size: 100,
                bank_refresh_secs: 30,
            },
            health: HealthConfig {
                max_price_age_secs: 30,
                max_confidence_bps: 300,
            },
            selection: SelectionConfig {
                min_bonus_usd: 0.5,
                ..Default::default()
            },
            routing: RoutingConfig {
                max_slippage_bps: 100,
                route_ttl_ms: 3_000,
                ..Default::default()
            },
            execution: ExecutionConfig {
                max_retries: 2,
                base_backoff_ms: 100,
                max_backoff_ms: 400,
                call_timeout_ms: 2_000,
                dry_run: false,
            },
            engine: EngineConfig {
                cycle_interval_ms: 500,
                max_concurrent_executions: 8,
            },
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or default.
    /// Supported values: testing, production, aggressive
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    pub fn from_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// Resolve the configuration: TOML file from `BOT_CONFIG` if set,
    /// otherwise the `BOT_PROFILE` profile, then list overrides, then validation.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("BOT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::from_env(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override whitelist/blacklist from `ACCOUNT_WHITELIST` / `ACCOUNT_BLACKLIST`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var("ACCOUNT_WHITELIST") {
            self.selection.whitelist = parse_address_list("ACCOUNT_WHITELIST", &raw)?;
        }
        if let Ok(raw) = std::env::var("ACCOUNT_BLACKLIST") {
            self.selection.blacklist = parse_address_list("ACCOUNT_BLACKLIST", &raw)?;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.fetch_concurrency == 0 {
            return Err(invalid("scanner.fetch_concurrency", "must be at least 1"));
        }
        if self.scanner.batch_size == 0 {
            return Err(invalid("scanner.batch_size", "must be at least 1"));
        }
        if self.health.max_price_age_secs == 0 {
            return Err(invalid("health.max_price_age_secs", "must be positive"));
        }
        if !self.selection.min_bonus_usd.is_finite() || self.selection.min_bonus_usd < 0.0 {
            return Err(invalid("selection.min_bonus_usd", "must be a non-negative number"));
        }
        if self.selection.close_factor_bps == 0 || self.selection.close_factor_bps > 10_000 {
            return Err(invalid("selection.close_factor_bps", "must be in 1..=10000"));
        }
        if self.routing.max_slippage_bps >= 10_000 {
            return Err(invalid("routing.max_slippage_bps", "must be below 10000"));
        }
        if self.routing.max_hops == 0 {
            return Err(invalid("routing.max_hops", "must be at least 1"));
        }
        if self.routing.route_ttl_ms == 0 {
            return Err(invalid("routing.route_ttl_ms", "must be positive"));
        }
        if self.execution.call_timeout_ms == 0 {
            return Err(invalid("execution.call_timeout_ms", "must be positive"));
        }
        if self.execution.max_backoff_ms < self.execution.base_backoff_ms {
            return Err(invalid(
                "execution.max_backoff_ms",
                "must not be below base_backoff_ms",
            ));
        }
        if self.engine.max_concurrent_executions == 0 {
            return Err(invalid("engine.max_concurrent_executions", "must be at least 1"));
        }
        if self.engine.cycle_interval_ms == 0 {
            return Err(invalid("engine.cycle_interval_ms", "must be positive"));
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            fetch_concurrency = self.scanner.fetch_concurrency,
            batch_size = self.scanner.batch_size,
            bank_refresh_secs = self.scanner.bank_refresh_secs,
            "Scanner parameters"
        );
        tracing::info!(
            max_price_age_secs = self.health.max_price_age_secs,
            max_confidence_bps = self.health.max_confidence_bps,
            "Health bounds"
        );
        tracing::info!(
            min_bonus = self.selection.min_bonus_usd,
            close_factor_bps = self.selection.close_factor_bps,
            whitelist = self.selection.whitelist.len(),
            blacklist = self.selection.blacklist.len(),
            "Selection policy"
        );
        tracing::info!(
            max_slippage_bps = self.routing.max_slippage_bps,
            max_hops = self.routing.max_hops,
            max_price_impact_bps = self.routing.max_price_impact_bps,
            route_ttl_ms = self.routing.route_ttl_ms,
            excluded_venues = ?self.routing.excluded_venues,
            "Routing constraints"
        );
        tracing::info!(
            max_retries = self.execution.max_retries,
            base_backoff_ms = self.execution.base_backoff_ms,
            call_timeout_ms = self.execution.call_timeout_ms,
            dry_run = self.execution.dry_run,
            cycle_interval_ms = self.engine.cycle_interval_ms,
            max_concurrent = self.engine.max_concurrent_executions,
            "Execution parameters"
        );
    }
}

/// Parse a comma-separated address list. Blank entries are ignored.
pub fn parse_address_list(var: &'static str, raw: &str) -> Result<Vec<Address>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Address>().map_err(|_| ConfigError::BadAddress {
                var,
                value: s.to_string(),
            })
        })
        .collect()
}
