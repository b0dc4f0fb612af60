//! Health evaluation for lending accounts.
//!
//! Collateral is credited at `deposit × price × asset weight` (weight ≤ 1) and
//! debt is charged at `borrow × price × liability weight` (weight ≥ 1). An
//! account whose weighted collateral no longer covers its weighted debt
//! (ratio < 1.0) is liquidatable.
//!
//! Evaluation is a pure function of (account, banks, prices, now): the same
//! inputs always produce the same snapshot.

use alloy::primitives::{Address, U256};
use alpha_liquidator_chain::{BankConfig, LendingAccount, OraclePrice};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;

use crate::config::HealthConfig;
use crate::u256_math::{mul_bps, value_wad, wad_div, wad_to_f64, WAD};

/// Why an account could not be evaluated this cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("price for {asset} is {age_secs}s old (max {max_age_secs}s)")]
    StaleData {
        asset: Address,
        age_secs: u64,
        max_age_secs: u64,
    },

    #[error("bank {0} not in snapshot")]
    MissingBank(Address),

    #[error("no price for {0}")]
    MissingPrice(Address),

    #[error("non-positive price for {asset}")]
    InvalidPrice { asset: Address },

    #[error("confidence for {asset} is {confidence_bps} bps of price (max {max_bps})")]
    ConfidenceTooWide {
        asset: Address,
        confidence_bps: u64,
        max_bps: u64,
    },
}

impl HealthError {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleData { .. })
    }
}

/// Weighted collateral over weighted debt.
///
/// Ordered so that `Finite` values sort by magnitude and `Infinite` sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthRatio {
    /// Ratio in WAD (1e18 = 1.0)
    Finite(U256),
    /// No debt
    Infinite,
}

impl HealthRatio {
    /// Ratio strictly below 1.0.
    pub fn is_liquidatable(&self) -> bool {
        matches!(self, Self::Finite(r) if *r < WAD)
    }

    /// For logging only.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Finite(r) => wad_to_f64(*r),
            Self::Infinite => f64::INFINITY,
        }
    }
}

impl fmt::Display for HealthRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(_) => write!(f, "{:.4}", self.as_f64()),
            Self::Infinite => write!(f, "inf"),
        }
    }
}

/// Valuation of one active balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceValue {
    pub bank: Address,
    pub mint: Address,
    pub decimals: u8,
    pub price_wad: U256,
    pub liquidation_discount_bps: u32,
    pub deposit: U256,
    pub borrow: U256,
    /// Market value of the deposit
    pub deposit_value: U256,
    /// Market value of the borrow
    pub borrow_value: U256,
    /// Deposit value after asset weight
    pub weighted_asset: U256,
    /// Borrow value after liability weight
    pub weighted_liability: U256,
}

/// Result of evaluating one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub account: Address,
    pub owner: Address,
    /// Weighted collateral (WAD)
    pub collateral_value: U256,
    /// Weighted debt (WAD)
    pub debt_value: U256,
    pub ratio: HealthRatio,
    /// Unix seconds the evaluation refers to
    pub computed_at: u64,
    pub balances: SmallVec<[BalanceValue; 8]>,
}

#[derive(Clone, Copy)]
enum Requirement {
    Maintenance,
    Initial,
}

/// Computes health snapshots from account state, bank parameters and prices.
#[derive(Debug, Clone)]
pub struct HealthCalculator {
    max_price_age_secs: u64,
    max_confidence_bps: u64,
}

impl HealthCalculator {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            max_price_age_secs: config.max_price_age_secs,
            max_confidence_bps: config.max_confidence_bps,
        }
    }

    /// Evaluate `account` against maintenance weights.
    ///
    /// `prices` is keyed by token mint.
    pub fn evaluate(
        &self,
        account: &LendingAccount,
        banks: &HashMap<Address, BankConfig>,
        prices: &HashMap<Address, OraclePrice>,
        now: u64,
    ) -> Result<HealthSnapshot, HealthError> {
        let mut balances = SmallVec::new();
        let mut collateral = U256::ZERO;
        let mut debt = U256::ZERO;

        for balance in account.active_balances() {
            let value = self.value_balance(
                balance.bank,
                balance.deposit,
                balance.borrow,
                banks,
                prices,
                now,
                Requirement::Maintenance,
            )?;
            collateral = collateral.saturating_add(value.weighted_asset);
            debt = debt.saturating_add(value.weighted_liability);
            balances.push(value);
        }

        Ok(HealthSnapshot {
            account: account.address,
            owner: account.owner,
            collateral_value: collateral,
            debt_value: debt,
            ratio: ratio(collateral, debt),
            computed_at: now,
            balances,
        })
    }

    /// Ratio under initial weights, the stricter requirement new borrows face.
    pub fn initial_ratio(
        &self,
        account: &LendingAccount,
        banks: &HashMap<Address, BankConfig>,
        prices: &HashMap<Address, OraclePrice>,
        now: u64,
    ) -> Result<HealthRatio, HealthError> {
        let mut collateral = U256::ZERO;
        let mut debt = U256::ZERO;

        for balance in account.active_balances() {
            let value = self.value_balance(
                balance.bank,
                balance.deposit,
                balance.borrow,
                banks,
                prices,
                now,
                Requirement::Initial,
            )?;
            collateral = collateral.saturating_add(value.weighted_asset);
            debt = debt.saturating_add(value.weighted_liability);
        }

        Ok(ratio(collateral, debt))
    }

    #[allow(clippy::too_many_arguments)]
    fn value_balance(
        &self,
        bank_id: Address,
        deposit: U256,
        borrow: U256,
        banks: &HashMap<Address, BankConfig>,
        prices: &HashMap<Address, OraclePrice>,
        now: u64,
        requirement: Requirement,
    ) -> Result<BalanceValue, HealthError> {
        let bank = banks.get(&bank_id).ok_or(HealthError::MissingBank(bank_id))?;
        let price = prices
            .get(&bank.mint)
            .ok_or(HealthError::MissingPrice(bank.mint))?;

        if price.is_stale(self.max_price_age_secs, now) {
            return Err(HealthError::StaleData {
                asset: bank.mint,
                age_secs: price.age_secs(now),
                max_age_secs: self.max_price_age_secs,
            });
        }

        let price_wad = price
            .price_wad()
            .filter(|p| !p.is_zero())
            .ok_or(HealthError::InvalidPrice { asset: bank.mint })?;

        let confidence_bps = price.confidence_bps().unwrap_or(u64::MAX);
        if confidence_bps > self.max_confidence_bps {
            return Err(HealthError::ConfidenceTooWide {
                asset: bank.mint,
                confidence_bps,
                max_bps: self.max_confidence_bps,
            });
        }

        let (asset_weight, liability_weight) = match requirement {
            Requirement::Maintenance => (bank.asset_weight_maint_bps, bank.liability_weight_maint_bps),
            Requirement::Initial => (bank.asset_weight_init_bps, bank.liability_weight_init_bps),
        };

        let deposit_value = value_wad(deposit, price_wad, bank.decimals);
        let borrow_value = value_wad(borrow, price_wad, bank.decimals);

        Ok(BalanceValue {
            bank: bank.address,
            mint: bank.mint,
            decimals: bank.decimals,
            price_wad,
            liquidation_discount_bps: bank.liquidation_discount_bps,
            deposit,
            borrow,
            deposit_value,
            borrow_value,
            weighted_asset: mul_bps(deposit_value, asset_weight),
            weighted_liability: mul_bps(borrow_value, liability_weight),
        })
    }
}

fn ratio(collateral: U256, debt: U256) -> HealthRatio {
    if debt.is_zero() {
        HealthRatio::Infinite
    } else {
        HealthRatio::Finite(wad_div(collateral, debt))
    }
}
