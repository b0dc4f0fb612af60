//! Read/write interface to the lending protocol ledger.

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{BankConfig, LendingAccount, SignedTransaction, SimulationResult, Submission};

/// Ledger gateway consumed by the engine.
///
/// Implementations validate what they return (`BankConfig::validate`) so that
/// nothing downstream has to trust loosely-shaped ledger data.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Enumerate every lending account of the group.
    async fn list_accounts(&self) -> Result<Vec<Address>, GatewayError>;

    /// Enumerate every bank of the group.
    async fn list_banks(&self) -> Result<Vec<Address>, GatewayError>;

    /// Fetch account states. Accounts that do not exist are omitted.
    async fn get_accounts(&self, ids: &[Address]) -> Result<Vec<LendingAccount>, GatewayError>;

    /// Fetch bank risk configurations. Banks that do not exist are omitted.
    async fn get_bank_configs(&self, ids: &[Address]) -> Result<Vec<BankConfig>, GatewayError>;

    /// Dry-run a signed transaction against current state.
    async fn simulate_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<SimulationResult, GatewayError>;

    /// Submit a signed transaction.
    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<Submission, GatewayError>;

    /// Slot a previously submitted signature landed in, `None` if it has not.
    async fn signature_status(&self, signature: &str) -> Result<Option<u64>, GatewayError>;
}
