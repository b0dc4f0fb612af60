//! Engine orchestration.
//!
//! One coordinating loop runs a cycle every `cycle_interval_ms`:
//! scan → select → route → execute. Executions run as tasks in a bounded
//! [`JoinSet`]; the loop never waits on them except when draining at stop.

use alloy::primitives::{Address, U256};
use alpha_liquidator_api::{RouteError, SwapRoutingService};
use alpha_liquidator_chain::{LedgerGateway, OracleFeed, TransactionSigner};
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{BotConfig, EngineConfig};
use crate::error::{Error, Result};
use crate::health::{HealthCalculator, HealthError};
use crate::liquidator::{ExecutionResult, LiquidationExecutor};
use crate::lock::ExecutionLocks;
use crate::metrics::{CycleMetrics, EngineMetrics, MetricsSnapshot};
use crate::route::RouteFinder;
use crate::scanner::{AccountScanner, CycleSnapshot, ScanOutcome};
use crate::selector::{AccountFilter, CandidateSelector, LiquidationCandidate};
use crate::u256_math::wad_to_f64;

/// Lifecycle of the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Running,
    Stopping,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dispatched task ended.
enum Dispatch {
    Executed(ExecutionResult),
    NoRoute(Address, RouteError),
    Cancelled(Address),
}

struct Inner {
    scanner: AccountScanner,
    selector: CandidateSelector,
    executor: LiquidationExecutor,
    filter: RwLock<AccountFilter>,
    config: EngineConfig,
    min_bonus: U256,
    state: RwLock<EngineState>,
    metrics: EngineMetrics,
    last_cycle: Mutex<CycleMetrics>,
    tasks: tokio::sync::Mutex<JoinSet<Dispatch>>,
    in_flight: AtomicUsize,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Liquidation engine.
pub struct Engine {
    inner: Arc<Inner>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("in_flight", &self.inner.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        scanner: AccountScanner,
        selector: CandidateSelector,
        executor: LiquidationExecutor,
        filter: AccountFilter,
        config: EngineConfig,
        min_bonus: U256,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                scanner,
                selector,
                executor,
                filter: RwLock::new(filter),
                config,
                min_bonus,
                state: RwLock::new(EngineState::Stopped),
                metrics: EngineMetrics::default(),
                last_cycle: Mutex::new(CycleMetrics::default()),
                tasks: tokio::sync::Mutex::new(JoinSet::new()),
                in_flight: AtomicUsize::new(0),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Wire every component from a resolved configuration.
    pub fn from_config(
        config: &BotConfig,
        ledger: Arc<dyn LedgerGateway>,
        oracle: Arc<dyn OracleFeed>,
        router: Arc<dyn SwapRoutingService>,
        signer: Arc<dyn TransactionSigner>,
        liquidator_account: Address,
    ) -> Self {
        let call_timeout = config.execution.call_timeout();
        let scanner = AccountScanner::new(
            Arc::clone(&ledger),
            oracle,
            HealthCalculator::new(&config.health),
            config.scanner.clone(),
            call_timeout,
        );
        let routes = RouteFinder::new(router, config.routing.clone(), call_timeout);
        let executor = LiquidationExecutor::new(
            ledger,
            signer,
            routes,
            ExecutionLocks::new(),
            config.execution.clone(),
            liquidator_account,
        );
        let filter = AccountFilter::new(
            config.selection.whitelist.iter().copied(),
            config.selection.blacklist.iter().copied(),
        );

        Self::new(
            scanner,
            CandidateSelector::with_close_factor(config.selection.close_factor_bps),
            executor,
            filter,
            config.engine.clone(),
            config.selection.min_bonus_wad(),
        )
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.read()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let last = *self.inner.last_cycle.lock();
        self.inner
            .metrics
            .snapshot(last, self.inner.in_flight.load(Ordering::Relaxed))
    }

    /// Replace the whitelist. Takes effect from the next cycle.
    pub fn set_whitelist(&self, ids: impl IntoIterator<Item = Address>) {
        let mut filter = self.inner.filter.write();
        *filter = filter.with_whitelist(ids);
        info!(size = filter.whitelist().len(), "Whitelist updated");
    }

    /// Replace the blacklist. Takes effect from the next cycle.
    pub fn set_blacklist(&self, ids: impl IntoIterator<Item = Address>) {
        let mut filter = self.inner.filter.write();
        *filter = filter.with_blacklist(ids);
        info!(size = filter.blacklist().len(), "Blacklist updated");
    }

    /// Spawn the cycle loop.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        {
            let mut state = self.inner.state.write();
            if *state != EngineState::Stopped {
                return Err(Error::InvalidState(state.as_str()));
            }
            *state = EngineState::Running;
        }

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });

        info!(
            interval_ms = self.inner.config.cycle_interval_ms,
            max_concurrent = self.inner.config.max_concurrent_executions,
            "Engine started"
        );
        *running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Cancel scanning and routing, wait for in-flight executions, then stop.
    pub async fn stop(&self) {
        let Some(Running { cancel, handle }) = self.running.lock().await.take() else {
            return;
        };

        *self.inner.state.write() = EngineState::Stopping;
        info!("Stopping engine");
        cancel.cancel();

        if let Err(e) = handle.await {
            error!(error = %e, "Engine loop terminated abnormally");
            self.inner.drain().await;
        }

        *self.inner.state.write() = EngineState::Stopped;
        info!("Engine stopped");
    }

    /// Run one cycle outside the loop.
    pub async fn run_cycle(&self) -> Result<CycleMetrics> {
        self.inner.cycle(&CancellationToken::new()).await
    }

    /// Wait for every in-flight execution to finish.
    pub async fn drain(&self) {
        self.inner.drain().await;
    }
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.cycle_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.cycle(&cancel).await {
                warn!(error = %e, "Cycle failed");
            }
        }

        self.drain().await;
    }

    #[instrument(skip_all)]
    async fn cycle(self: &Arc<Self>, cancel: &CancellationToken) -> Result<CycleMetrics> {
        let started = Instant::now();
        self.reap().await;
        self.metrics.record_cycle();

        let mut cycle = CycleMetrics::default();
        let filter = self.filter.read().clone();

        let tracked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.cancelled(cycle, started)),
            tracked = self.scanner.tracked_accounts(filter.whitelist()) => tracked?,
        };
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.cancelled(cycle, started)),
            snapshot = self.scanner.snapshot() => snapshot?,
        };

        let mut healths = Vec::with_capacity(tracked.len());
        let outcomes = self.scanner.scan(tracked, Arc::clone(&snapshot), cancel.clone());
        futures::pin_mut!(outcomes);
        while let Some(outcome) = outcomes.next().await {
            cycle.accounts_scanned += 1;
            match outcome {
                ScanOutcome::Evaluated(health) => healths.push(health),
                ScanOutcome::Unhealthy(_, HealthError::StaleData { .. }) => cycle.stale_skips += 1,
                ScanOutcome::Unhealthy(..) => cycle.data_skips += 1,
                ScanOutcome::FetchFailed(account, e) => {
                    debug!(account = %account, error = %e, "Account fetch failed");
                    cycle.fetch_failures += 1;
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(self.cancelled(cycle, started));
        }

        let candidates = self.selector.select(&healths, &filter, self.min_bonus);
        cycle.candidates = candidates.len() as u64;
        self.dispatch(candidates, &snapshot, cancel, &mut cycle).await;

        Ok(self.finish(cycle, started))
    }

    fn cancelled(&self, cycle: CycleMetrics, started: Instant) -> CycleMetrics {
        debug!(scanned = cycle.accounts_scanned, "Cycle cancelled");
        self.finish(cycle, started)
    }

    fn finish(&self, mut cycle: CycleMetrics, started: Instant) -> CycleMetrics {
        cycle.duration_ms = started.elapsed().as_millis() as u64;
        *self.last_cycle.lock() = cycle;

        info!(
            scanned = cycle.accounts_scanned,
            fetch_failures = cycle.fetch_failures,
            stale = cycle.stale_skips,
            candidates = cycle.candidates,
            dispatched = cycle.dispatched,
            deferred = cycle.deferred,
            locked = cycle.locked,
            duration_ms = cycle.duration_ms,
            "Cycle complete"
        );
        cycle
    }

    async fn dispatch(
        self: &Arc<Self>,
        candidates: Vec<LiquidationCandidate>,
        snapshot: &Arc<CycleSnapshot>,
        cancel: &CancellationToken,
        cycle: &mut CycleMetrics,
    ) {
        let mut tasks = self.tasks.lock().await;
        let capacity = self
            .config
            .max_concurrent_executions
            .saturating_sub(tasks.len());

        for candidate in candidates {
            if cycle.dispatched as usize >= capacity {
                cycle.deferred += 1;
                continue;
            }

            let Some(guard) = self.executor.locks().try_acquire(candidate.account) else {
                debug!(account = %candidate.account, "Execution already in flight, skipping");
                cycle.locked += 1;
                continue;
            };

            info!(
                account = %candidate.account,
                health = %candidate.health,
                bonus_usd = wad_to_f64(candidate.estimated_bonus),
                "Dispatching liquidation"
            );

            let inner = Arc::clone(self);
            let snapshot = Arc::clone(snapshot);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let account = candidate.account;
                let route = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Dispatch::Cancelled(account),
                    route = inner.executor.routes().route_for(&candidate) => route,
                };

                let route = match route {
                    Ok(route) => route,
                    Err(e) => return Dispatch::NoRoute(account, e),
                };

                let result = inner.executor.execute_with_guard(guard, &candidate, route).await;
                if result.is_success() {
                    inner.log_post_liquidation(account, &snapshot).await;
                }
                Dispatch::Executed(result)
            });
            cycle.dispatched += 1;
        }

        self.in_flight.store(tasks.len(), Ordering::Relaxed);
    }

    async fn log_post_liquidation(&self, account: Address, snapshot: &CycleSnapshot) {
        match self.scanner.recheck(account, snapshot).await {
            Ok((maintenance, initial)) => info!(
                account = %account,
                maintenance = %maintenance,
                initial = %initial,
                "Post-liquidation health"
            ),
            Err(e) => debug!(account = %account, error = %e, "Post-liquidation recheck failed"),
        }
    }

    /// Record executions that have already finished.
    async fn reap(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(Some(joined)) = tasks.join_next().now_or_never() {
            self.record(joined);
        }
        self.in_flight.store(tasks.len(), Ordering::Relaxed);
    }

    async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Draining in-flight executions");
        }
        while let Some(joined) = tasks.join_next().await {
            self.record(joined);
            self.in_flight.store(tasks.len(), Ordering::Relaxed);
        }
        self.in_flight.store(0, Ordering::Relaxed);
    }

    fn record(&self, joined: std::result::Result<Dispatch, tokio::task::JoinError>) {
        match joined {
            Ok(Dispatch::Executed(result)) => {
                debug!(
                    account = %result.account,
                    outcome = result.outcome.label(),
                    attempts = result.attempts,
                    "Execution finished"
                );
                self.metrics.record_outcome(&result.outcome);
            }
            Ok(Dispatch::NoRoute(account, e)) => {
                warn!(account = %account, error = %e, "No route for candidate");
                self.metrics.record_no_route();
            }
            Ok(Dispatch::Cancelled(account)) => {
                debug!(account = %account, "Route acquisition cancelled");
            }
            Err(e) => error!(error = %e, "Execution task panicked"),
        }
    }
}
