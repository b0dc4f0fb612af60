//! Alpha Liquidator
//!
//! Liquidation engine for an isolated-group lending protocol.
//! Features:
//! - Periodic health scans of every tracked lending account
//! - Candidate ranking by estimated liquidation bonus
//! - Collateral swap routing through Liqd.ag
//! - Locked, simulated and retried transaction submission

use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alpha_liquidator_api::LiqdRouter;
use alpha_liquidator_chain::{
    HermesOracle, LedgerGateway, LedgerSnapshot, LocalSigner, MemoryLedger, OracleFeed,
    StaticOracle, TransactionSigner,
};
use alpha_liquidator_core::{BotConfig, Engine};

/// Environment variable names.
mod env {
    pub const LEDGER_SNAPSHOT: &str = "LEDGER_SNAPSHOT";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const LIQUIDATOR_ACCOUNT: &str = "LIQUIDATOR_ACCOUNT";
    pub const HERMES_URL: &str = "HERMES_URL";
    /// `asset=feed_id` pairs, comma-separated
    pub const HERMES_FEEDS: &str = "HERMES_FEEDS";
    pub const LIQD_URL: &str = "LIQD_URL";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();
    init_tracing();

    let config = BotConfig::load()?;
    config.log_config();

    let snapshot_path = std::env::var(env::LEDGER_SNAPSHOT)
        .with_context(|| format!("Missing env var: {}", env::LEDGER_SNAPSHOT))?;
    let snapshot = LedgerSnapshot::from_file(&snapshot_path)?;
    let oracle = build_oracle(&config, &snapshot)?;
    let ledger = Arc::new(MemoryLedger::from_snapshot(snapshot)?);

    // An unreachable ledger at startup is fatal
    let banks = ledger.list_banks().await?;
    let accounts = ledger.list_accounts().await?;
    info!(
        snapshot = %snapshot_path,
        banks = banks.len(),
        accounts = accounts.len(),
        "Ledger loaded"
    );

    let signer = build_signer(&config)?;
    let liquidator_account = match std::env::var(env::LIQUIDATOR_ACCOUNT) {
        Ok(raw) => raw
            .trim()
            .parse::<Address>()
            .with_context(|| format!("Invalid address for {}", env::LIQUIDATOR_ACCOUNT))?,
        Err(_) => signer.authority(),
    };
    info!(
        authority = %signer.authority(),
        liquidator_account = %liquidator_account,
        "Signer ready"
    );

    let mut router =
        LiqdRouter::new(config.execution.call_timeout())?.with_route_ttl(config.routing.route_ttl());
    if let Ok(url) = std::env::var(env::LIQD_URL) {
        router = router.with_base_url(url);
    }

    let engine = Engine::from_config(
        &config,
        ledger,
        oracle,
        Arc::new(router),
        signer,
        liquidator_account,
    );

    engine.start().await?;
    info!("Engine running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    engine.stop().await;

    info!(metrics = %serde_json::to_string(&engine.metrics())?, "Final metrics");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,alpha_liquidator_core=debug,alpha_liquidator_chain=debug")
    });

    let json = std::env::var(env::LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Hermes when feeds are configured, otherwise the snapshot's static prices.
fn build_oracle(config: &BotConfig, snapshot: &LedgerSnapshot) -> Result<Arc<dyn OracleFeed>> {
    let Ok(raw) = std::env::var(env::HERMES_FEEDS) else {
        if snapshot.prices.is_empty() {
            warn!("No HERMES_FEEDS and no prices in snapshot, every account will be skipped");
        }
        return Ok(Arc::new(StaticOracle::from_prices(snapshot.prices.iter().cloned())));
    };

    let mut oracle = HermesOracle::new(config.execution.call_timeout())?;
    if let Ok(url) = std::env::var(env::HERMES_URL) {
        oracle = oracle.with_base_url(url);
    }

    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (asset, feed) = pair
            .split_once('=')
            .with_context(|| format!("Expected asset=feed_id in {}, got {}", env::HERMES_FEEDS, pair))?;
        let asset: Address = asset
            .trim()
            .parse()
            .with_context(|| format!("Invalid asset address in {}: {}", env::HERMES_FEEDS, asset))?;
        oracle = oracle.with_feed(asset, feed.trim());
    }

    info!("Using Pyth Hermes price feeds");
    Ok(Arc::new(oracle))
}

fn build_signer(config: &BotConfig) -> Result<Arc<dyn TransactionSigner>> {
    match std::env::var(env::PRIVATE_KEY) {
        Ok(key) => Ok(Arc::new(LocalSigner::from_private_key(&key)?)),
        Err(_) if config.execution.dry_run => {
            warn!("No PRIVATE_KEY set, using an ephemeral key for dry run");
            Ok(Arc::new(LocalSigner::random()))
        }
        Err(_) => anyhow::bail!("Missing env var: {}", env::PRIVATE_KEY),
    }
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╔═╗┬  ┌─┐┬ ┬┌─┐  ╦  ┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
    ╠═╣│  ├─┘├─┤├─┤  ║  ││─┼┐│ ││ ││├─┤ │ │ │├┬┘
    ╩ ╩┴─┘┴  ┴ ┴┴ ┴  ╩═╝┴└─┘└└─┘┴─┴┘┴ ┴ ┴ └─┘┴└─
    Liquidation Engine v0.1.0
    "#
    );
}
