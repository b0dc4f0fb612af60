//! Candidate selection: which unhealthy accounts to liquidate, and how.

use alloy::primitives::{Address, U256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::health::{BalanceValue, HealthRatio, HealthSnapshot};
use crate::u256_math::{amount_for_value, mul_bps, wad_to_f64, BPS_DENOMINATOR};

/// Whitelist / blacklist policy.
///
/// The blacklist always wins. An empty whitelist admits every account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    whitelist: HashSet<Address>,
    blacklist: HashSet<Address>,
}

impl AccountFilter {
    pub fn new(
        whitelist: impl IntoIterator<Item = Address>,
        blacklist: impl IntoIterator<Item = Address>,
    ) -> Self {
        Self {
            whitelist: whitelist.into_iter().collect(),
            blacklist: blacklist.into_iter().collect(),
        }
    }

    pub fn allows(&self, account: &Address) -> bool {
        if self.blacklist.contains(account) {
            return false;
        }
        self.whitelist.is_empty() || self.whitelist.contains(account)
    }

    pub fn whitelist(&self) -> &HashSet<Address> {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &HashSet<Address> {
        &self.blacklist
    }

    pub fn with_whitelist(&self, ids: impl IntoIterator<Item = Address>) -> Self {
        Self {
            whitelist: ids.into_iter().collect(),
            blacklist: self.blacklist.clone(),
        }
    }

    pub fn with_blacklist(&self, ids: impl IntoIterator<Item = Address>) -> Self {
        Self {
            whitelist: self.whitelist.clone(),
            blacklist: ids.into_iter().collect(),
        }
    }
}

/// Collateral side of a liquidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralLeg {
    pub bank: Address,
    pub mint: Address,
    pub decimals: u8,
    /// Collateral to seize (native units)
    pub seize_amount: U256,
    /// Market value of the seized collateral (WAD)
    pub seize_value: U256,
}

/// Debt side of a liquidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiabilityLeg {
    pub bank: Address,
    pub mint: Address,
    pub decimals: u8,
    /// Outstanding borrow (native units)
    pub outstanding: U256,
    /// Market value of the outstanding borrow (WAD)
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationCandidate {
    pub account: Address,
    pub owner: Address,
    pub health: HealthRatio,
    pub asset: CollateralLeg,
    pub liability: LiabilityLeg,
    /// Expected liquidator profit (WAD)
    pub estimated_bonus: U256,
}

/// Seizure sizing produced by a [`BonusEstimator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BonusEstimate {
    pub seize_amount: U256,
    pub seize_value: U256,
    pub bonus: U256,
}

/// Sizes a liquidation of `collateral` against `liability`.
///
/// Returns `None` when nothing worthwhile can be seized.
pub trait BonusEstimator: Send + Sync {
    fn estimate(&self, collateral: &BalanceValue, liability: &BalanceValue) -> Option<BonusEstimate>;
}

/// Liquidator receives the collateral bank's discount on what it seizes.
///
/// At most `close_factor` of the debt is repaid per liquidation, so seizure is
/// `min(collateral, liability × close_factor / (1 − discount))`.
#[derive(Debug, Clone, Copy)]
pub struct DiscountBonus {
    pub close_factor_bps: u32,
}

impl BonusEstimator for DiscountBonus {
    fn estimate(&self, collateral: &BalanceValue, liability: &BalanceValue) -> Option<BonusEstimate> {
        let discount = collateral.liquidation_discount_bps.min(9_999);
        let repayable = mul_bps(liability.borrow_value, self.close_factor_bps);
        let by_debt = repayable.saturating_mul(BPS_DENOMINATOR) / U256::from(10_000 - discount);

        let seize_value = collateral.deposit_value.min(by_debt);
        let seize_amount =
            amount_for_value(seize_value, collateral.price_wad, collateral.decimals).min(collateral.deposit);
        if seize_amount.is_zero() {
            return None;
        }

        Some(BonusEstimate {
            seize_amount,
            seize_value,
            bonus: mul_bps(seize_value, discount),
        })
    }
}

/// Turns health snapshots into a ranked list of liquidation candidates.
#[derive(Clone)]
pub struct CandidateSelector {
    estimator: Arc<dyn BonusEstimator>,
}

impl std::fmt::Debug for CandidateSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSelector").finish_non_exhaustive()
    }
}

impl CandidateSelector {
    pub fn new(estimator: Arc<dyn BonusEstimator>) -> Self {
        Self { estimator }
    }

    /// Selector with the discount estimator.
    pub fn with_close_factor(close_factor_bps: u32) -> Self {
        Self::new(Arc::new(DiscountBonus { close_factor_bps }))
    }

    /// Eligible candidates ranked by bonus (desc), then health (asc), then address.
    pub fn select(
        &self,
        snapshots: &[HealthSnapshot],
        filter: &AccountFilter,
        min_bonus: U256,
    ) -> Vec<LiquidationCandidate> {
        let mut candidates: Vec<LiquidationCandidate> = snapshots
            .iter()
            .filter(|s| s.ratio.is_liquidatable())
            .filter(|s| filter.allows(&s.account))
            .filter_map(|s| self.build(s))
            .filter(|c| {
                let keep = c.estimated_bonus >= min_bonus;
                if !keep {
                    debug!(
                        account = %c.account,
                        bonus = wad_to_f64(c.estimated_bonus),
                        "Bonus below minimum, skipping"
                    );
                }
                keep
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.estimated_bonus
                .cmp(&a.estimated_bonus)
                .then_with(|| a.health.cmp(&b.health))
                .then_with(|| a.account.cmp(&b.account))
        });
        candidates
    }

    fn build(&self, snapshot: &HealthSnapshot) -> Option<LiquidationCandidate> {
        let (collateral, liability) = worst_pair(snapshot)?;
        let estimate = self.estimator.estimate(collateral, liability)?;

        Some(LiquidationCandidate {
            account: snapshot.account,
            owner: snapshot.owner,
            health: snapshot.ratio,
            asset: CollateralLeg {
                bank: collateral.bank,
                mint: collateral.mint,
                decimals: collateral.decimals,
                seize_amount: estimate.seize_amount,
                seize_value: estimate.seize_value,
            },
            liability: LiabilityLeg {
                bank: liability.bank,
                mint: liability.mint,
                decimals: liability.decimals,
                outstanding: liability.borrow,
                value: liability.borrow_value,
            },
            estimated_bonus: estimate.bonus,
        })
    }
}

/// Largest weighted liability, and the largest weighted collateral in a
/// different mint (a same-mint pair has nothing to swap).
fn worst_pair(snapshot: &HealthSnapshot) -> Option<(&BalanceValue, &BalanceValue)> {
    let liability = snapshot
        .balances
        .iter()
        .filter(|b| !b.borrow.is_zero())
        .max_by(|a, b| a.weighted_liability.cmp(&b.weighted_liability))?;

    let collateral = snapshot
        .balances
        .iter()
        .filter(|b| !b.deposit.is_zero() && b.mint != liability.mint)
        .max_by(|a, b| a.weighted_asset.cmp(&b.weighted_asset));

    if collateral.is_none() {
        debug!(account = %snapshot.account, "No swappable collateral for largest liability");
    }
    collateral.map(|c| (c, liability))
}
