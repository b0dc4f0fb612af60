//! In-process ledger used for paper trading and tests.
//!
//! Holds accounts, banks and reference prices in memory, verifies transaction
//! signatures, rejects replays, and runs simulations against a copy of its
//! state so a dry-run never mutates anything observable. Liquidations are only
//! accepted against accounts below maintenance health, and the seized value is
//! bounded by the repaid value plus the bank's liquidation discount.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::ledger::LedgerGateway;
use crate::oracle::OraclePrice;
use crate::signer::recover_authority;
use crate::types::{
    BankConfig, Instruction, LendingAccount, LiquidationInstruction, SignedTransaction,
    SimulationResult, Submission, BPS_SCALE,
};

/// Compute units charged per instruction in simulation reports.
const UNITS_PER_INSTRUCTION: u64 = 40_000;

/// Serializable ledger contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub banks: Vec<BankConfig>,
    #[serde(default)]
    pub accounts: Vec<LendingAccount>,
    /// Oracle prices captured alongside the ledger (optional)
    #[serde(default)]
    pub prices: Vec<OraclePrice>,
}

impl LedgerSnapshot {
    /// Load a snapshot from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::NotFound(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| GatewayError::InvalidData(e.to_string()))
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Address, LendingAccount>,
    banks: HashMap<Address, BankConfig>,
    /// mint -> reference price used by the liquidation checks
    prices: HashMap<Address, OraclePrice>,
    slot: u64,
    /// signature -> slot it landed in
    processed: HashMap<String, u64>,
}

/// In-memory ledger implementing [`LedgerGateway`].
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    /// Artificial latency applied to every call
    latency: Duration,
    /// Remaining submissions to fail with a transport error
    failing_submissions: AtomicU32,
    /// Remaining submissions that land but report a transport error
    lost_acks: AtomicU32,
    /// Accounts whose fetch fails with a transport error
    poisoned: DashSet<Address>,
    /// Number of submissions that reached the ledger
    submit_calls: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from a snapshot, validating every bank.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, GatewayError> {
        let ledger = Self::new();
        for bank in snapshot.banks {
            ledger.upsert_bank(bank)?;
        }
        for account in snapshot.accounts {
            ledger.upsert_account(account);
        }
        for price in snapshot.prices {
            ledger.set_price(price);
        }
        info!(
            banks = ledger.state.read().banks.len(),
            accounts = ledger.state.read().accounts.len(),
            prices = ledger.state.read().prices.len(),
            "Memory ledger loaded"
        );
        Ok(ledger)
    }

    /// Apply artificial latency to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn upsert_bank(&self, bank: BankConfig) -> Result<(), GatewayError> {
        bank.validate()?;
        self.state.write().banks.insert(bank.address, bank);
        Ok(())
    }

    pub fn upsert_account(&self, account: LendingAccount) {
        self.state.write().accounts.insert(account.address, account);
    }

    /// Set the reference price of a mint.
    pub fn set_price(&self, price: OraclePrice) {
        self.state.write().prices.insert(price.asset, price);
    }

    pub fn remove_account(&self, address: &Address) {
        self.state.write().accounts.remove(address);
    }

    /// Current state of an account.
    pub fn account(&self, address: &Address) -> Option<LendingAccount> {
        self.state.read().accounts.get(address).cloned()
    }

    /// Current slot (number of landed transactions).
    pub fn slot(&self) -> u64 {
        self.state.read().slot
    }

    /// Fail the next `n` submissions with a transient transport error.
    pub fn fail_next_submissions(&self, n: u32) {
        self.failing_submissions.store(n, Ordering::SeqCst);
    }

    /// Land the next `n` submissions but report a transport error to the caller.
    pub fn drop_next_acks(&self, n: u32) {
        self.lost_acks.store(n, Ordering::SeqCst);
    }

    /// Make every fetch that includes `address` fail.
    pub fn poison_account(&self, address: Address) {
        self.poisoned.insert(address);
    }

    /// Number of submission calls received.
    pub fn submit_calls(&self) -> u64 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn verify(tx: &SignedTransaction) -> Result<(), GatewayError> {
        let signer = recover_authority(tx)?;
        if signer != tx.tx.authority {
            return Err(GatewayError::Rejected(format!(
                "signature from {} does not match authority {}",
                signer, tx.tx.authority
            )));
        }
        Ok(())
    }

    /// Execute instructions against `accounts`, returning program logs.
    fn execute(
        accounts: &mut HashMap<Address, LendingAccount>,
        market: &Market<'_>,
        tx: &SignedTransaction,
    ) -> Result<Vec<String>, String> {
        let mut logs = Vec::with_capacity(tx.tx.instructions.len());

        for instruction in &tx.tx.instructions {
            match instruction {
                Instruction::Liquidate(ix) => {
                    let account = accounts
                        .get_mut(&ix.liquidatee)
                        .ok_or_else(|| format!("account {} not found", ix.liquidatee))?;
                    market.check_liquidation(account, ix)?;
                    account.apply_liquidation(ix)?;
                    logs.push(format!(
                        "liquidate {}: seized {} from {}, repaid {} to {}",
                        ix.liquidatee,
                        ix.asset_amount,
                        ix.asset_bank,
                        ix.repay_amount,
                        ix.liability_bank
                    ));
                }
                Instruction::Swap(ix) => {
                    if ix.legs.is_empty() {
                        return Err("swap without legs".to_string());
                    }
                    if ix.min_output.is_zero() {
                        return Err("swap without minimum output".to_string());
                    }
                    logs.push(format!(
                        "swap {} {} -> {} (min {}) via {} legs",
                        ix.amount_in,
                        ix.token_in,
                        ix.token_out,
                        ix.min_output,
                        ix.legs.len()
                    ));
                }
            }
        }

        Ok(logs)
    }
}

/// Bank and price tables the liquidation checks read from.
struct Market<'a> {
    banks: &'a HashMap<Address, BankConfig>,
    prices: &'a HashMap<Address, OraclePrice>,
}

impl<'a> Market<'a> {
    fn of(state: &'a LedgerState) -> Self {
        Self {
            banks: &state.banks,
            prices: &state.prices,
        }
    }

    fn bank(&self, address: &Address) -> Result<&'a BankConfig, String> {
        self.banks
            .get(address)
            .ok_or_else(|| format!("unknown bank {}", address))
    }

    /// USD value (WAD) of `amount` native units held at `bank`.
    fn value(&self, bank: &BankConfig, amount: U256) -> Result<U256, String> {
        let price = self
            .prices
            .get(&bank.mint)
            .and_then(|p| p.price_wad())
            .ok_or_else(|| format!("no price for mint {}", bank.mint))?;
        let unit = U256::from(10u64).pow(U256::from(bank.decimals));
        Ok(amount.saturating_mul(price) / unit)
    }

    /// The liquidatee must be below maintenance health, and the collateral
    /// seized may not exceed `repaid / (1 - discount)` in value.
    fn check_liquidation(
        &self,
        account: &LendingAccount,
        ix: &LiquidationInstruction,
    ) -> Result<(), String> {
        let bps = U256::from(BPS_SCALE);
        let mut assets = U256::ZERO;
        let mut liabilities = U256::ZERO;
        for balance in account.active_balances() {
            let bank = self.bank(&balance.bank)?;
            if !balance.deposit.is_zero() {
                let weighted = self
                    .value(bank, balance.deposit)?
                    .saturating_mul(U256::from(bank.asset_weight_maint_bps))
                    / bps;
                assets = assets.saturating_add(weighted);
            }
            if !balance.borrow.is_zero() {
                let weighted = self
                    .value(bank, balance.borrow)?
                    .saturating_mul(U256::from(bank.liability_weight_maint_bps))
                    / bps;
                liabilities = liabilities.saturating_add(weighted);
            }
        }
        if assets >= liabilities {
            return Err(format!(
                "account {} is healthy: weighted assets {} >= weighted liabilities {}",
                account.address, assets, liabilities
            ));
        }

        let asset_bank = self.bank(&ix.asset_bank)?;
        let seized = self.value(asset_bank, ix.asset_amount)?;
        let repaid = self.value(self.bank(&ix.liability_bank)?, ix.repay_amount)?;
        let keep = U256::from(BPS_SCALE - asset_bank.liquidation_discount_bps);
        if seized.saturating_mul(keep) > repaid.saturating_mul(bps) {
            return Err(format!(
                "seized value {} exceeds repaid value {} at {} bps discount",
                seized, repaid, asset_bank.liquidation_discount_bps
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn list_accounts(&self) -> Result<Vec<Address>, GatewayError> {
        self.delay().await;
        let mut ids: Vec<Address> = self.state.read().accounts.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_banks(&self) -> Result<Vec<Address>, GatewayError> {
        self.delay().await;
        let mut ids: Vec<Address> = self.state.read().banks.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_accounts(&self, ids: &[Address]) -> Result<Vec<LendingAccount>, GatewayError> {
        self.delay().await;
        if let Some(bad) = ids.iter().find(|id| self.poisoned.contains(*id)) {
            return Err(GatewayError::Transport(format!("failed to decode account {}", bad)));
        }
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.accounts.get(id).cloned())
            .collect())
    }

    async fn get_bank_configs(&self, ids: &[Address]) -> Result<Vec<BankConfig>, GatewayError> {
        self.delay().await;
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.banks.get(id).cloned())
            .collect())
    }

    async fn simulate_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<SimulationResult, GatewayError> {
        self.delay().await;
        Self::verify(tx)?;

        // Dry-run on a copy of the account table
        let state = self.state.read();
        let mut accounts = state.accounts.clone();
        let result = Self::execute(&mut accounts, &Market::of(&state), tx);
        drop(state);
        match result {
            Ok(logs) => {
                let units = UNITS_PER_INSTRUCTION * tx.tx.instructions.len() as u64;
                debug!(units = units, "Simulation succeeded");
                Ok(SimulationResult::ok(logs, units))
            }
            Err(reason) => {
                debug!(reason = %reason, "Simulation failed");
                Ok(SimulationResult::failed(reason))
            }
        }
    }

    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<Submission, GatewayError> {
        self.delay().await;
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        Self::verify(tx)?;

        if Self::take_one(&self.failing_submissions) {
            warn!("Injected submission failure");
            return Err(GatewayError::Transport("connection reset by peer".to_string()));
        }

        let signature = tx.signature_hex();
        let mut state = self.state.write();

        if let Some(slot) = state.processed.get(&signature) {
            return Err(GatewayError::AlreadyProcessed {
                signature,
                slot: *slot,
            });
        }

        // All instructions apply or none do
        let mut accounts = state.accounts.clone();
        Self::execute(&mut accounts, &Market::of(&state), tx).map_err(GatewayError::Rejected)?;
        state.accounts = accounts;
        state.slot += 1;
        let slot = state.slot;
        state.processed.insert(signature.clone(), slot);
        drop(state);

        if Self::take_one(&self.lost_acks) {
            warn!(slot = slot, "Injected lost acknowledgement");
            return Err(GatewayError::Transport("response lost".to_string()));
        }

        Ok(Submission { slot, signature })
    }

    async fn signature_status(&self, signature: &str) -> Result<Option<u64>, GatewayError> {
        self.delay().await;
        Ok(self.state.read().processed.get(signature).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{LocalSigner, TransactionSigner};
    use crate::types::{Balance, LiquidationInstruction, UnsignedTransaction};

    const ASSET_BANK: Address = Address::repeat_byte(0x01);
    const LIAB_BANK: Address = Address::repeat_byte(0x02);
    const ASSET_MINT: Address = Address::repeat_byte(0xA1);
    const LIAB_MINT: Address = Address::repeat_byte(0xA2);
    const VICTIM: Address = Address::repeat_byte(0x09);

    fn bank(address: Address, mint: Address) -> BankConfig {
        BankConfig {
            address,
            mint,
            decimals: 6,
            asset_weight_init_bps: 8000,
            asset_weight_maint_bps: 9000,
            liability_weight_init_bps: 12000,
            liability_weight_maint_bps: 11000,
            deposit_limit: U256::MAX,
            borrow_limit: U256::MAX,
            oracle: mint,
            liquidation_discount_bps: 500,
        }
    }

    fn price(asset: Address, cents: i64) -> OraclePrice {
        OraclePrice {
            asset,
            price: cents,
            conf: 0,
            expo: -2,
            publish_time: 1_700_000_000,
        }
    }

    /// 1000 units of a $1 asset against 900 units of a $2 liability:
    /// weighted assets 900 vs weighted liabilities 1980.
    fn snapshot() -> LedgerSnapshot {
        LedgerSnapshot {
            banks: vec![bank(ASSET_BANK, ASSET_MINT), bank(LIAB_BANK, LIAB_MINT)],
            accounts: vec![LendingAccount::new(VICTIM, Address::repeat_byte(0x08))
                .with_balance(Balance::deposit(ASSET_BANK, U256::from(1_000u64)))
                .with_balance(Balance::borrow(LIAB_BANK, U256::from(900u64)))],
            prices: vec![price(ASSET_MINT, 100), price(LIAB_MINT, 200)],
        }
    }

    fn ledger() -> MemoryLedger {
        MemoryLedger::from_snapshot(snapshot()).unwrap()
    }

    async fn signed(signer: &LocalSigner, asset_amount: u64, repay_amount: u64) -> SignedTransaction {
        let tx = UnsignedTransaction {
            authority: signer.authority(),
            nonce: signer.next_nonce(),
            instructions: vec![Instruction::Liquidate(LiquidationInstruction {
                liquidator_account: Address::repeat_byte(0x07),
                liquidatee: VICTIM,
                asset_bank: ASSET_BANK,
                liability_bank: LIAB_BANK,
                asset_amount: U256::from(asset_amount),
                repay_amount: U256::from(repay_amount),
            })],
        };
        signer.sign(tx).await.unwrap()
    }

    #[tokio::test]
    async fn test_simulation_does_not_mutate() {
        let ledger = ledger();
        let signer = LocalSigner::random();
        let tx = signed(&signer, 200, 100).await;

        let sim = ledger.simulate_transaction(&tx).await.unwrap();
        assert!(sim.success, "{:?}", sim.error);
        assert_eq!(
            ledger.account(&VICTIM).unwrap().balance(&ASSET_BANK).unwrap().deposit,
            U256::from(1_000u64)
        );
    }

    #[tokio::test]
    async fn test_simulation_reports_insufficient_collateral() {
        let ledger = ledger();
        let signer = LocalSigner::random();
        let tx = signed(&signer, 1_500, 900).await;

        let sim = ledger.simulate_transaction(&tx).await.unwrap();
        assert!(!sim.success);
        assert!(sim.error.unwrap().contains("insufficient collateral"));
    }

    #[tokio::test]
    async fn test_healthy_account_cannot_be_liquidated() {
        let ledger = ledger();
        // Liability drops to $0.50: weighted liabilities 495 < assets 900
        ledger.set_price(price(LIAB_MINT, 50));
        let signer = LocalSigner::random();
        let tx = signed(&signer, 50, 100).await;

        let sim = ledger.simulate_transaction(&tx).await.unwrap();
        assert!(!sim.success);
        assert!(sim.error.unwrap().contains("is healthy"));

        assert!(matches!(
            ledger.submit_transaction(&tx).await,
            Err(GatewayError::Rejected(_))
        ));
        assert_eq!(ledger.slot(), 0);
        assert_eq!(
            ledger.account(&VICTIM).unwrap().balance(&LIAB_BANK).unwrap().borrow,
            U256::from(900u64)
        );
    }

    #[tokio::test]
    async fn test_seizure_bounded_by_discount() {
        let ledger = ledger();
        let signer = LocalSigner::random();

        // $200 repaid allows at most $210.52 seized at a 5% discount
        let sim = ledger
            .simulate_transaction(&signed(&signer, 210, 100).await)
            .await
            .unwrap();
        assert!(sim.success, "{:?}", sim.error);

        let sim = ledger
            .simulate_transaction(&signed(&signer, 300, 100).await)
            .await
            .unwrap();
        assert!(!sim.success);
        assert!(sim.error.unwrap().contains("exceeds repaid value"));
    }

    #[tokio::test]
    async fn test_missing_price_rejects_liquidation() {
        let mut snapshot = snapshot();
        snapshot.prices.retain(|p| p.asset != LIAB_MINT);
        let ledger = MemoryLedger::from_snapshot(snapshot).unwrap();
        let signer = LocalSigner::random();

        let sim = ledger
            .simulate_transaction(&signed(&signer, 200, 100).await)
            .await
            .unwrap();
        assert!(!sim.success);
        assert!(sim.error.unwrap().contains("no price"));
    }

    #[tokio::test]
    async fn test_submit_applies_and_rejects_replay() {
        let ledger = ledger();
        let signer = LocalSigner::random();
        let tx = signed(&signer, 200, 100).await;

        let submission = ledger.submit_transaction(&tx).await.unwrap();
        assert_eq!(submission.slot, 1);
        assert_eq!(
            ledger.account(&VICTIM).unwrap().balance(&LIAB_BANK).unwrap().borrow,
            U256::from(800u64)
        );

        match ledger.submit_transaction(&tx).await {
            Err(GatewayError::AlreadyProcessed { slot, .. }) => assert_eq!(slot, 1),
            other => panic!("expected replay rejection, got {:?}", other),
        }
        assert_eq!(ledger.slot(), 1);
    }

    #[tokio::test]
    async fn test_signature_status_after_lost_ack() {
        let ledger = ledger();
        let signer = LocalSigner::random();
        let tx = signed(&signer, 200, 100).await;

        assert_eq!(ledger.signature_status(&tx.signature_hex()).await.unwrap(), None);

        ledger.drop_next_acks(1);
        assert!(ledger.submit_transaction(&tx).await.unwrap_err().is_transient());
        assert_eq!(
            ledger.signature_status(&tx.signature_hex()).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_rejects_forged_authority() {
        let ledger = ledger();
        let signer = LocalSigner::random();
        let mut tx = signed(&signer, 200, 100).await;
        tx.tx.authority = Address::repeat_byte(0x66);

        assert!(matches!(
            ledger.submit_transaction(&tx).await,
            Err(GatewayError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let ledger = ledger();
        let signer = LocalSigner::random();
        let tx = signed(&signer, 200, 100).await;

        ledger.fail_next_submissions(1);
        let err = ledger.submit_transaction(&tx).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ledger.slot(), 0);

        assert!(ledger.submit_transaction(&tx).await.is_ok());
        assert_eq!(ledger.submit_calls(), 2);
    }

    #[tokio::test]
    async fn test_poisoned_fetch() {
        let ledger = ledger();
        ledger.poison_account(VICTIM);
        assert!(ledger.get_accounts(&[VICTIM]).await.is_err());
        assert!(ledger
            .get_accounts(&[Address::repeat_byte(0x55)])
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_snapshot_rejects_invalid_bank() {
        let mut bad = bank(ASSET_BANK, ASSET_MINT);
        bad.liability_weight_maint_bps = 5_000;
        let snapshot = LedgerSnapshot {
            banks: vec![bad],
            ..Default::default()
        };
        assert!(MemoryLedger::from_snapshot(snapshot).is_err());
    }
}
