//! Liquidation executor.
//!
//! Turns a candidate plus a swap route into one signed transaction
//! (liquidate, then swap the seized collateral into the debt asset), dry-runs
//! it, and submits it with bounded retries. The transaction is signed once, so
//! a retry after a lost acknowledgement is recognised by the ledger as the
//! same transaction rather than landing twice.

use alloy::primitives::Address;
use alpha_liquidator_api::SwapRoute;
use alpha_liquidator_chain::{
    with_deadline, GatewayError, Instruction, LedgerGateway, LiquidationInstruction,
    SignedTransaction, SwapInstruction, SwapLeg, TransactionSigner, UnsignedTransaction,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::lock::{ExecutionGuard, ExecutionLocks};
use crate::route::RouteFinder;
use crate::selector::LiquidationCandidate;

/// How a liquidation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Landed (or simulated successfully in dry-run mode, with an empty signature).
    Success { signature: String, slot: u64 },
    /// Another attempt holds the account lock.
    Skipped,
    /// The ledger dry-run rejected the transaction. Never retried.
    SimulationFailed { reason: String },
    /// Rejected, or transient failures exhausted the retry budget.
    SubmissionFailed { reason: String },
    /// The route expired before the transaction could be submitted.
    Expired,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Skipped => "skipped",
            Self::SimulationFailed { .. } => "simulation_failed",
            Self::SubmissionFailed { .. } => "submission_failed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { signature, slot } => write!(f, "success at slot {} ({})", slot, signature),
            Self::SimulationFailed { reason } => write!(f, "simulation failed: {}", reason),
            Self::SubmissionFailed { reason } => write!(f, "submission failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of one liquidation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub account: Address,
    pub outcome: ExecutionOutcome,
    /// Submission calls made
    pub attempts: u32,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Shared retry allowance for the simulate and submit phases.
struct RetryBudget {
    used: u32,
    max: u32,
}

impl RetryBudget {
    /// Consume one retry, returning its 1-based number, or `None` when spent.
    fn take(&mut self) -> Option<u32> {
        if self.used >= self.max {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }
}

/// Builds, signs, simulates and submits liquidation transactions.
pub struct LiquidationExecutor {
    ledger: Arc<dyn LedgerGateway>,
    signer: Arc<dyn TransactionSigner>,
    routes: RouteFinder,
    locks: Arc<ExecutionLocks>,
    config: ExecutionConfig,
    /// Liquidator's own lending account, credited with seized collateral
    liquidator_account: Address,
}

impl fmt::Debug for LiquidationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiquidationExecutor")
            .field("authority", &self.signer.authority())
            .field("liquidator_account", &self.liquidator_account)
            .field("dry_run", &self.config.dry_run)
            .finish_non_exhaustive()
    }
}

impl LiquidationExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        signer: Arc<dyn TransactionSigner>,
        routes: RouteFinder,
        locks: Arc<ExecutionLocks>,
        config: ExecutionConfig,
        liquidator_account: Address,
    ) -> Self {
        Self {
            ledger,
            signer,
            routes,
            locks,
            config,
            liquidator_account,
        }
    }

    pub fn locks(&self) -> &Arc<ExecutionLocks> {
        &self.locks
    }

    pub fn routes(&self) -> &RouteFinder {
        &self.routes
    }

    /// Attempt the liquidation, taking the account lock first.
    ///
    /// Returns `Skipped` immediately if another attempt holds the lock.
    pub async fn execute(&self, candidate: &LiquidationCandidate, route: SwapRoute) -> ExecutionResult {
        let started = Instant::now();
        match self.locks.try_acquire(candidate.account) {
            Some(guard) => self.execute_locked(guard, candidate, route, started).await,
            None => {
                debug!(account = %candidate.account, "Account locked by another attempt, skipping");
                ExecutionResult {
                    account: candidate.account,
                    outcome: ExecutionOutcome::Skipped,
                    attempts: 0,
                    elapsed: started.elapsed(),
                }
            }
        }
    }

    /// Attempt the liquidation under a lock the caller already holds.
    pub async fn execute_with_guard(
        &self,
        guard: ExecutionGuard,
        candidate: &LiquidationCandidate,
        route: SwapRoute,
    ) -> ExecutionResult {
        self.execute_locked(guard, candidate, route, Instant::now()).await
    }

    #[instrument(skip_all, fields(account = %candidate.account, bonus = %candidate.estimated_bonus))]
    async fn execute_locked(
        &self,
        _guard: ExecutionGuard,
        candidate: &LiquidationCandidate,
        route: SwapRoute,
        started: Instant,
    ) -> ExecutionResult {
        let mut attempts = 0;
        let outcome = self.run(candidate, route, &mut attempts).await;

        let elapsed = started.elapsed();
        match &outcome {
            ExecutionOutcome::Success { signature, slot } => info!(
                signature = %signature,
                slot = slot,
                attempts = attempts,
                elapsed_ms = elapsed.as_millis(),
                dry_run = self.config.dry_run,
                "Liquidation succeeded"
            ),
            other => warn!(
                outcome = %other,
                attempts = attempts,
                elapsed_ms = elapsed.as_millis(),
                "Liquidation did not land"
            ),
        }

        ExecutionResult {
            account: candidate.account,
            outcome,
            attempts,
            elapsed,
        }
    }

    async fn run(
        &self,
        candidate: &LiquidationCandidate,
        route: SwapRoute,
        attempts: &mut u32,
    ) -> ExecutionOutcome {
        let route = if route.is_expired() {
            debug!("Route expired before execution, re-quoting once");
            match self.routes.route_for(candidate).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    debug!(error = %e, "No fresh route");
                    return ExecutionOutcome::Expired;
                }
            }
        } else {
            route
        };

        let tx = match self.build_and_sign(candidate, &route).await {
            Ok(tx) => tx,
            Err(e) => {
                return ExecutionOutcome::SubmissionFailed {
                    reason: e.to_string(),
                }
            }
        };

        let mut budget = RetryBudget {
            used: 0,
            max: self.config.max_retries,
        };

        if let Err(outcome) = self.simulate(&tx, &mut budget).await {
            return outcome;
        }

        if self.config.dry_run {
            info!(
                repay = %repay_of(&tx),
                "Dry run: simulation passed, not submitting"
            );
            return ExecutionOutcome::Success {
                signature: String::new(),
                slot: 0,
            };
        }

        self.submit(&tx, &route, &mut budget, attempts).await
    }

    /// Liquidate instruction followed by the collateral swap.
    async fn build_and_sign(
        &self,
        candidate: &LiquidationCandidate,
        route: &SwapRoute,
    ) -> Result<SignedTransaction, GatewayError> {
        let repay_amount = route.min_output.min(candidate.liability.outstanding);

        let liquidate = LiquidationInstruction {
            liquidator_account: self.liquidator_account,
            liquidatee: candidate.account,
            asset_bank: candidate.asset.bank,
            liability_bank: candidate.liability.bank,
            asset_amount: candidate.asset.seize_amount,
            repay_amount,
        };

        let swap = SwapInstruction {
            token_in: route.token_in,
            token_out: route.token_out,
            amount_in: route.amount_in,
            min_output: route.min_output,
            legs: route
                .hops
                .iter()
                .map(|hop| SwapLeg {
                    venue: hop.venue.clone(),
                    token_in: hop.token_in,
                    token_out: hop.token_out,
                    amount_in: hop.amount_in,
                })
                .collect(),
        };

        let unsigned = UnsignedTransaction {
            authority: self.signer.authority(),
            nonce: self.signer.next_nonce(),
            instructions: vec![Instruction::Liquidate(liquidate), Instruction::Swap(swap)],
        };

        debug!(
            nonce = unsigned.nonce,
            seize = %candidate.asset.seize_amount,
            repay = %repay_amount,
            hops = route.hop_count(),
            "Signing liquidation transaction"
        );
        self.signer.sign(unsigned).await
    }

    async fn simulate(&self, tx: &SignedTransaction, budget: &mut RetryBudget) -> Result<(), ExecutionOutcome> {
        loop {
            let result = with_deadline(
                "simulate_transaction",
                self.config.call_timeout(),
                self.ledger.simulate_transaction(tx),
            )
            .await;

            match result {
                Ok(sim) if sim.success => {
                    debug!(units = sim.units_consumed, "Simulation passed");
                    return Ok(());
                }
                Ok(sim) => {
                    let reason = sim.error.unwrap_or_else(|| "simulation failed".to_string());
                    return Err(ExecutionOutcome::SimulationFailed { reason });
                }
                Err(e) if e.is_transient() => match budget.take() {
                    Some(retry) => {
                        let delay = self.config.backoff(retry);
                        warn!(error = %e, retry = retry, delay_ms = delay.as_millis(), "Simulation call failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(ExecutionOutcome::SubmissionFailed {
                            reason: e.to_string(),
                        })
                    }
                },
                Err(e) => {
                    return Err(ExecutionOutcome::SimulationFailed {
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    async fn submit(
        &self,
        tx: &SignedTransaction,
        route: &SwapRoute,
        budget: &mut RetryBudget,
        attempts: &mut u32,
    ) -> ExecutionOutcome {
        let signature = tx.signature_hex();
        loop {
            // Every earlier attempt ended in a transient error; one of them may still have landed
            if *attempts > 0 {
                if let Some(slot) = self.landed_slot(&signature).await {
                    info!(slot = slot, "Earlier attempt landed without acknowledgement");
                    return ExecutionOutcome::Success { signature, slot };
                }
            }

            if route.is_expired() {
                warn!(attempts = *attempts, "Route expired before submission");
                return ExecutionOutcome::Expired;
            }

            *attempts += 1;
            let result = with_deadline(
                "submit_transaction",
                self.config.call_timeout(),
                self.ledger.submit_transaction(tx),
            )
            .await;

            let err = match result {
                Ok(submission) => {
                    return ExecutionOutcome::Success {
                        signature: submission.signature,
                        slot: submission.slot,
                    }
                }
                // Same signature: an earlier attempt landed even though we did not hear back
                Err(GatewayError::AlreadyProcessed { signature, slot }) => {
                    info!(slot = slot, "Transaction already processed by an earlier attempt");
                    return ExecutionOutcome::Success { signature, slot };
                }
                Err(e) if e.is_transient() => e,
                Err(e) => {
                    return ExecutionOutcome::SubmissionFailed {
                        reason: e.to_string(),
                    }
                }
            };

            match budget.take() {
                Some(retry) => {
                    let delay = self.config.backoff(retry);
                    warn!(
                        error = %err,
                        attempt = *attempts,
                        delay_ms = delay.as_millis(),
                        "Submission failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return ExecutionOutcome::SubmissionFailed {
                        reason: format!("retries exhausted: {}", err),
                    }
                }
            }
        }
    }

    /// Slot `signature` landed in. A failed status query counts as not landed.
    async fn landed_slot(&self, signature: &str) -> Option<u64> {
        let status = with_deadline(
            "signature_status",
            self.config.call_timeout(),
            self.ledger.signature_status(signature),
        )
        .await;
        match status {
            Ok(slot) => slot,
            Err(e) => {
                debug!(error = %e, "Signature status unavailable");
                None
            }
        }
    }
}

fn repay_of(tx: &SignedTransaction) -> String {
    tx.tx
        .instructions
        .iter()
        .find_map(|ix| match ix {
            Instruction::Liquidate(l) => Some(l.repay_amount.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}
