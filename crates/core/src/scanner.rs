//! Account scanning.
//!
//! Each cycle takes one [`CycleSnapshot`] of bank parameters and prices, then
//! streams health evaluations for the tracked accounts, fetching them from the
//! ledger in bounded-concurrency batches. Per-account retries after a failed
//! batch share the same bound.

use alloy::primitives::Address;
use alpha_liquidator_chain::{
    with_deadline, BankConfig, GatewayError, LedgerGateway, LendingAccount, OracleFeed, OraclePrice,
};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ScannerConfig;
use crate::health::{HealthCalculator, HealthError, HealthRatio, HealthSnapshot};

/// Bank parameters and prices shared read-only by one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSnapshot {
    pub banks: HashMap<Address, BankConfig>,
    /// Keyed by token mint
    pub prices: HashMap<Address, OraclePrice>,
    /// Mints whose price could not be fetched this cycle
    pub missing_prices: HashSet<Address>,
    /// Unix seconds
    pub taken_at: u64,
}

/// Result of scanning one account.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Evaluated(HealthSnapshot),
    /// Health could not be computed this cycle (stale or missing data).
    Unhealthy(Address, HealthError),
    FetchFailed(Address, GatewayError),
}

impl ScanOutcome {
    pub fn account(&self) -> Address {
        match self {
            Self::Evaluated(snapshot) => snapshot.account,
            Self::Unhealthy(account, _) | Self::FetchFailed(account, _) => *account,
        }
    }
}

struct CachedBanks {
    fetched_at: Instant,
    banks: HashMap<Address, BankConfig>,
}

/// Fetches account state and computes health for the tracked set.
pub struct AccountScanner {
    ledger: Arc<dyn LedgerGateway>,
    oracle: Arc<dyn OracleFeed>,
    health: HealthCalculator,
    config: ScannerConfig,
    call_timeout: Duration,
    bank_cache: Mutex<Option<CachedBanks>>,
    /// At most `fetch_concurrency` account fetches in flight
    fetch_permits: Semaphore,
}

impl AccountScanner {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        oracle: Arc<dyn OracleFeed>,
        health: HealthCalculator,
        config: ScannerConfig,
        call_timeout: Duration,
    ) -> Self {
        let fetch_permits = Semaphore::new(config.fetch_concurrency.max(1));
        Self {
            ledger,
            oracle,
            health,
            config,
            call_timeout,
            bank_cache: Mutex::new(None),
            fetch_permits,
        }
    }

    pub fn health(&self) -> &HealthCalculator {
        &self.health
    }

    /// Accounts to watch: the whitelist when one is configured, otherwise
    /// every account of the lending group.
    pub async fn tracked_accounts(&self, whitelist: &HashSet<Address>) -> Result<Vec<Address>, GatewayError> {
        if !whitelist.is_empty() {
            let mut ids: Vec<Address> = whitelist.iter().copied().collect();
            ids.sort();
            return Ok(ids);
        }
        with_deadline("list_accounts", self.call_timeout, self.ledger.list_accounts()).await
    }

    /// Bank parameters (cached up to `bank_refresh_secs`) plus fresh prices.
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> Result<Arc<CycleSnapshot>, GatewayError> {
        let banks = self.banks().await?;

        let mut mints: Vec<Address> = banks.values().map(|bank| bank.mint).collect();
        mints.sort();
        mints.dedup();

        let fetches = mints.iter().map(|&mint| async move {
            let result = with_deadline("get_price", self.call_timeout, self.oracle.get_price(mint)).await;
            (mint, result)
        });

        let mut prices = HashMap::with_capacity(mints.len());
        let mut missing_prices = HashSet::new();
        for (mint, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(price) => {
                    prices.insert(mint, price);
                }
                Err(e) => {
                    warn!(asset = %mint, error = %e, "Price unavailable this cycle");
                    missing_prices.insert(mint);
                }
            }
        }

        debug!(
            banks = banks.len(),
            prices = prices.len(),
            missing = missing_prices.len(),
            "Cycle snapshot taken"
        );

        Ok(Arc::new(CycleSnapshot {
            banks,
            prices,
            missing_prices,
            taken_at: unix_now(),
        }))
    }

    async fn banks(&self) -> Result<HashMap<Address, BankConfig>, GatewayError> {
        {
            let cache = self.bank_cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.config.bank_refresh() {
                    return Ok(cached.banks.clone());
                }
            }
        }

        let ids = with_deadline("list_banks", self.call_timeout, self.ledger.list_banks()).await?;
        let configs =
            with_deadline("get_bank_configs", self.call_timeout, self.ledger.get_bank_configs(&ids)).await?;

        let mut banks = HashMap::with_capacity(configs.len());
        for bank in configs {
            match bank.validate() {
                Ok(()) => {
                    banks.insert(bank.address, bank);
                }
                Err(e) => warn!(bank = %bank.address, error = %e, "Ignoring invalid bank config"),
            }
        }

        info!(banks = banks.len(), "Bank configs refreshed");
        *self.bank_cache.lock() = Some(CachedBanks {
            fetched_at: Instant::now(),
            banks: banks.clone(),
        });
        Ok(banks)
    }

    /// Stream one outcome per tracked account, in completion order.
    ///
    /// The stream ends early once `cancel` fires.
    pub fn scan<'a>(
        &'a self,
        tracked: Vec<Address>,
        snapshot: Arc<CycleSnapshot>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ScanOutcome> + Send + 'a {
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<Address>> = tracked.chunks(batch_size).map(<[Address]>::to_vec).collect();

        stream::iter(batches)
            .map(move |batch| {
                let snapshot = Arc::clone(&snapshot);
                async move { self.scan_batch(batch, &snapshot).await }
            })
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .flat_map(stream::iter)
            .take_until(async move { cancel.cancelled().await })
    }

    async fn scan_batch(&self, batch: Vec<Address>, snapshot: &CycleSnapshot) -> Vec<ScanOutcome> {
        match self.fetch_accounts(&batch).await {
            Ok(accounts) => self.evaluate_batch(&batch, accounts, snapshot),
            Err(e) => {
                warn!(
                    size = batch.len(),
                    error = %e,
                    "Batch fetch failed, retrying accounts individually"
                );
                stream::iter(batch)
                    .map(|id| async move {
                        match self.fetch_accounts(&[id]).await {
                            Ok(accounts) => self.evaluate_batch(&[id], accounts, snapshot),
                            Err(e) => vec![ScanOutcome::FetchFailed(id, e)],
                        }
                    })
                    .buffer_unordered(self.config.fetch_concurrency.max(1))
                    .flat_map(stream::iter)
                    .collect()
                    .await
            }
        }
    }

    async fn fetch_accounts(&self, ids: &[Address]) -> Result<Vec<LendingAccount>, GatewayError> {
        let _permit = self
            .fetch_permits
            .acquire()
            .await
            .map_err(|_| GatewayError::Transport("account fetch limiter closed".to_string()))?;
        with_deadline("get_accounts", self.call_timeout, self.ledger.get_accounts(ids)).await
    }

    /// Maintenance and initial ratios of `account` as the ledger holds it now.
    pub async fn recheck(
        &self,
        account: Address,
        snapshot: &CycleSnapshot,
    ) -> crate::Result<(HealthRatio, HealthRatio)> {
        let fetched =
            with_deadline("get_accounts", self.call_timeout, self.ledger.get_accounts(&[account])).await?;
        let state = fetched
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("account {}", account)))?;

        let maintenance = self
            .health
            .evaluate(&state, &snapshot.banks, &snapshot.prices, snapshot.taken_at)?
            .ratio;
        let initial = self
            .health
            .initial_ratio(&state, &snapshot.banks, &snapshot.prices, snapshot.taken_at)?;
        Ok((maintenance, initial))
    }

    fn evaluate_batch(
        &self,
        ids: &[Address],
        accounts: Vec<LendingAccount>,
        snapshot: &CycleSnapshot,
    ) -> Vec<ScanOutcome> {
        let mut by_address: HashMap<Address, LendingAccount> =
            accounts.into_iter().map(|account| (account.address, account)).collect();

        ids.iter()
            .map(|&id| match by_address.remove(&id) {
                Some(account) => self.evaluate(&account, snapshot),
                None => ScanOutcome::FetchFailed(id, GatewayError::NotFound(format!("account {}", id))),
            })
            .collect()
    }

    fn evaluate(&self, account: &LendingAccount, snapshot: &CycleSnapshot) -> ScanOutcome {
        match self
            .health
            .evaluate(account, &snapshot.banks, &snapshot.prices, snapshot.taken_at)
        {
            Ok(health) => ScanOutcome::Evaluated(health),
            Err(e) => {
                debug!(account = %account.address, error = %e, "Skipping account this cycle");
                ScanOutcome::Unhealthy(account.address, e)
            }
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::tests::{account, bank, price, SOL, SOL_BANK, USDC, USDC_BANK};
    use alloy::primitives::U256;
    use alpha_liquidator_chain::{
        Balance, MemoryLedger, SignedTransaction, SimulationResult, StaticOracle, Submission,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Ledger that records how many account fetches overlap.
    struct CountingLedger {
        inner: MemoryLedger,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl LedgerGateway for CountingLedger {
        async fn list_accounts(&self) -> Result<Vec<Address>, GatewayError> {
            self.inner.list_accounts().await
        }

        async fn list_banks(&self) -> Result<Vec<Address>, GatewayError> {
            self.inner.list_banks().await
        }

        async fn get_accounts(&self, ids: &[Address]) -> Result<Vec<LendingAccount>, GatewayError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.inner.get_accounts(ids).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn get_bank_configs(&self, ids: &[Address]) -> Result<Vec<BankConfig>, GatewayError> {
            self.inner.get_bank_configs(ids).await
        }

        async fn simulate_transaction(
            &self,
            tx: &SignedTransaction,
        ) -> Result<SimulationResult, GatewayError> {
            self.inner.simulate_transaction(tx).await
        }

        async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<Submission, GatewayError> {
            self.inner.submit_transaction(tx).await
        }

        async fn signature_status(&self, signature: &str) -> Result<Option<u64>, GatewayError> {
            self.inner.signature_status(signature).await
        }
    }

    fn ledger() -> Arc<MemoryLedger> {
        let ledger = MemoryLedger::new();
        ledger.upsert_bank(bank(SOL_BANK, SOL, 9)).unwrap();
        ledger.upsert_bank(bank(USDC_BANK, USDC, 6)).unwrap();
        Arc::new(ledger)
    }

    fn oracle() -> Arc<StaticOracle> {
        let now = unix_now();
        Arc::new(StaticOracle::from_prices([price(SOL, 100, now), price(USDC, 1, now)]))
    }

    fn scanner(ledger: Arc<MemoryLedger>, oracle: Arc<StaticOracle>, batch_size: usize) -> AccountScanner {
        let config = ScannerConfig {
            batch_size,
            fetch_concurrency: 2,
            ..Default::default()
        };
        AccountScanner::new(
            ledger,
            oracle,
            HealthCalculator::new(&Default::default()),
            config,
            Duration::from_secs(1),
        )
    }

    async fn collect(scanner: &AccountScanner, tracked: Vec<Address>) -> Vec<ScanOutcome> {
        let snapshot = scanner.snapshot().await.unwrap();
        scanner
            .scan(tracked, snapshot, CancellationToken::new())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_scan_evaluates_every_account() {
        let ledger = ledger();
        ledger.upsert_account(account(Address::repeat_byte(1), 15, 1_000));
        ledger.upsert_account(account(Address::repeat_byte(2), 8, 1_000));
        ledger.upsert_account(account(Address::repeat_byte(3), 1, 0));
        let scanner = scanner(ledger.clone(), oracle(), 2);

        let tracked = scanner.tracked_accounts(&HashSet::new()).await.unwrap();
        assert_eq!(tracked.len(), 3);

        let outcomes = collect(&scanner, tracked).await;
        assert_eq!(outcomes.len(), 3);

        let mut liquidatable = 0;
        for outcome in &outcomes {
            match outcome {
                ScanOutcome::Evaluated(snapshot) if snapshot.ratio.is_liquidatable() => liquidatable += 1,
                ScanOutcome::Evaluated(snapshot) if snapshot.account == Address::repeat_byte(3) => {
                    assert_eq!(snapshot.ratio, HealthRatio::Infinite)
                }
                ScanOutcome::Evaluated(_) => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(liquidatable, 1);
    }

    #[tokio::test]
    async fn test_bad_account_does_not_take_down_batch() {
        let ledger = ledger();
        let good = Address::repeat_byte(1);
        let bad = Address::repeat_byte(2);
        ledger.upsert_account(account(good, 8, 1_000));
        ledger.upsert_account(account(bad, 8, 1_000));
        ledger.poison_account(bad);
        let scanner = scanner(ledger, oracle(), 10);

        let outcomes = collect(&scanner, vec![good, bad]).await;

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            match outcome {
                ScanOutcome::Evaluated(snapshot) => assert_eq!(snapshot.account, good),
                ScanOutcome::FetchFailed(account, e) => {
                    assert_eq!(account, bad);
                    assert!(e.is_transient());
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_individual_retries_share_fetch_bound() {
        let inner = MemoryLedger::new();
        inner.upsert_bank(bank(SOL_BANK, SOL, 9)).unwrap();
        inner.upsert_bank(bank(USDC_BANK, USDC, 6)).unwrap();
        let tracked: Vec<Address> = (1..=40u8).map(Address::with_last_byte).collect();
        for &id in &tracked {
            inner.upsert_account(account(id, 8, 1_000));
        }
        // One bad account in each batch of 20
        inner.poison_account(tracked[0]);
        inner.poison_account(tracked[20]);

        let ledger = Arc::new(CountingLedger {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = ScannerConfig {
            batch_size: 20,
            fetch_concurrency: 2,
            ..Default::default()
        };
        let scanner = AccountScanner::new(
            ledger.clone(),
            oracle(),
            HealthCalculator::new(&Default::default()),
            config,
            Duration::from_secs(1),
        );

        let snapshot = scanner.snapshot().await.unwrap();
        let outcomes: Vec<ScanOutcome> = scanner
            .scan(tracked, snapshot, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(outcomes.len(), 40);
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, ScanOutcome::FetchFailed(..)))
            .count();
        assert_eq!(failed, 2);
        let peak = ledger.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "{} account fetches overlapped", peak);
    }

    #[tokio::test]
    async fn test_unknown_account_reported_as_fetch_failure() {
        let scanner = scanner(ledger(), oracle(), 10);
        let ghost = Address::repeat_byte(0x42);

        let outcomes = collect(&scanner, vec![ghost]).await;
        assert!(matches!(
            outcomes.as_slice(),
            [ScanOutcome::FetchFailed(account, GatewayError::NotFound(_))] if *account == ghost
        ));
    }

    #[tokio::test]
    async fn test_stale_price_marks_dependent_accounts_only() {
        let ledger = ledger();
        let borrower = Address::repeat_byte(1);
        let depositor = Address::repeat_byte(2);
        ledger.upsert_account(account(borrower, 8, 1_000));
        ledger.upsert_account(
            account(depositor, 0, 0).with_balance(Balance::deposit(USDC_BANK, U256::from(5_000_000u64))),
        );

        let now = unix_now();
        let oracle = Arc::new(StaticOracle::from_prices([
            price(SOL, 100, now - 120),
            price(USDC, 1, now),
        ]));
        let scanner = scanner(ledger, oracle, 10);

        for outcome in collect(&scanner, vec![borrower, depositor]).await {
            match outcome {
                ScanOutcome::Unhealthy(account, e) => {
                    assert_eq!(account, borrower);
                    assert!(e.is_stale());
                }
                ScanOutcome::Evaluated(snapshot) => assert_eq!(snapshot.account, depositor),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_price_poisons_only_that_asset() {
        let ledger = ledger();
        let borrower = Address::repeat_byte(1);
        ledger.upsert_account(account(borrower, 8, 1_000));
        let oracle = Arc::new(StaticOracle::from_prices([price(USDC, 1, unix_now())]));
        let scanner = scanner(ledger, oracle, 10);

        let snapshot = scanner.snapshot().await.unwrap();
        assert!(snapshot.missing_prices.contains(&SOL));
        assert!(snapshot.prices.contains_key(&USDC));

        let outcomes: Vec<_> = scanner
            .scan(vec![borrower], snapshot, CancellationToken::new())
            .collect()
            .await;
        assert!(matches!(
            outcomes.as_slice(),
            [ScanOutcome::Unhealthy(_, HealthError::MissingPrice(mint))] if *mint == SOL
        ));
    }

    #[tokio::test]
    async fn test_bank_configs_cached_between_cycles() {
        let ledger = ledger();
        let scanner = scanner(ledger.clone(), oracle(), 10);

        assert_eq!(scanner.snapshot().await.unwrap().banks.len(), 2);

        // New bank is not visible until the refresh interval passes
        ledger
            .upsert_bank(bank(Address::repeat_byte(0xB3), Address::repeat_byte(0xA3), 6))
            .unwrap();
        assert_eq!(scanner.snapshot().await.unwrap().banks.len(), 2);
    }

    #[tokio::test]
    async fn test_recheck_reports_both_requirements() {
        let ledger = ledger();
        let id = Address::repeat_byte(1);
        ledger.upsert_account(account(id, 15, 1_000));
        let scanner = scanner(ledger, oracle(), 10);
        let snapshot = scanner.snapshot().await.unwrap();

        let (maintenance, initial) = scanner.recheck(id, &snapshot).await.unwrap();
        // Unit weights: both requirements agree at 1500 / 1000
        assert_eq!(maintenance, initial);
        assert!(!maintenance.is_liquidatable());

        assert!(scanner.recheck(Address::repeat_byte(9), &snapshot).await.is_err());
    }

    #[tokio::test]
    async fn test_whitelist_defines_tracked_set() {
        let ledger = ledger();
        ledger.upsert_account(account(Address::repeat_byte(1), 8, 1_000));
        let scanner = scanner(ledger, oracle(), 10);

        let whitelist: HashSet<Address> = [Address::repeat_byte(9)].into_iter().collect();
        assert_eq!(
            scanner.tracked_accounts(&whitelist).await.unwrap(),
            vec![Address::repeat_byte(9)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_scan_ends_early() {
        let ledger = MemoryLedger::new().with_latency(Duration::from_millis(50));
        ledger.upsert_bank(bank(SOL_BANK, SOL, 9)).unwrap();
        ledger.upsert_bank(bank(USDC_BANK, USDC, 6)).unwrap();
        let tracked: Vec<Address> = (1..=20u8).map(Address::repeat_byte).collect();
        for id in &tracked {
            ledger.upsert_account(account(*id, 8, 1_000));
        }
        let scanner = scanner(Arc::new(ledger), oracle(), 1);

        let snapshot = scanner.snapshot().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcomes: Vec<_> = scanner.scan(tracked, snapshot, cancel).collect().await;
        assert!(outcomes.is_empty());
    }
}
