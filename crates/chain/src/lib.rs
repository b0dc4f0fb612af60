//! Ledger interaction layer for the liquidation engine.
//!
//! This crate provides:
//! - Typed ledger data (lending accounts, bank risk parameters, transactions)
//!   validated at the gateway boundary
//! - The `LedgerGateway` read/write interface and an in-process `MemoryLedger`
//! - Oracle price feeds (static snapshot and Pyth Hermes)
//! - Transaction signing with a local key

mod error;
mod ledger;
mod memory;
pub mod oracle;
mod signer;
mod types;

pub use error::{with_deadline, GatewayError};
pub use ledger::LedgerGateway;
pub use memory::{LedgerSnapshot, MemoryLedger};
pub use oracle::{HermesOracle, OracleFeed, OraclePrice, StaticOracle};
pub use signer::{recover_authority, LocalSigner, NonceManager, TransactionSigner};
pub use types::{
    Balance, BankConfig, Instruction, LendingAccount, LiquidationInstruction, SignedTransaction,
    SimulationResult, Submission, SwapInstruction, SwapLeg, UnsignedTransaction, BPS_SCALE,
};
