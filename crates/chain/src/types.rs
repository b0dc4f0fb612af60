//! Ledger data model: lending accounts, bank risk parameters and transactions.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::GatewayError;

/// Basis points denominator (10000 = 100%).
pub const BPS_SCALE: u32 = 10_000;

/// Largest token decimals a bank may declare.
const MAX_DECIMALS: u8 = 30;

/// Per-bank balance entry of a lending account.
///
/// Direction carries the sign: `deposit` is collateral, `borrow` is debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Bank this balance belongs to
    pub bank: Address,
    /// Deposited amount (native token units)
    #[serde(default)]
    pub deposit: U256,
    /// Borrowed amount (native token units)
    #[serde(default)]
    pub borrow: U256,
}

impl Balance {
    pub fn deposit(bank: Address, amount: U256) -> Self {
        Self {
            bank,
            deposit: amount,
            borrow: U256::ZERO,
        }
    }

    pub fn borrow(bank: Address, amount: U256) -> Self {
        Self {
            bank,
            deposit: U256::ZERO,
            borrow: amount,
        }
    }

    /// Inactive balances carry neither deposit nor borrow.
    pub fn is_active(&self) -> bool {
        !self.deposit.is_zero() || !self.borrow.is_zero()
    }
}

/// Lending account as read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingAccount {
    /// Account address
    pub address: Address,
    /// Owner (authority) of the account
    pub owner: Address,
    /// Per-bank balances
    #[serde(default)]
    pub balances: SmallVec<[Balance; 8]>,
}

impl LendingAccount {
    pub fn new(address: Address, owner: Address) -> Self {
        Self {
            address,
            owner,
            balances: SmallVec::new(),
        }
    }

    pub fn with_balance(mut self, balance: Balance) -> Self {
        self.balances.push(balance);
        self
    }

    /// Balance held at `bank`, if any.
    pub fn balance(&self, bank: &Address) -> Option<&Balance> {
        self.balances.iter().find(|b| &b.bank == bank)
    }

    fn balance_mut(&mut self, bank: &Address) -> Option<&mut Balance> {
        self.balances.iter_mut().find(|b| &b.bank == bank)
    }

    /// Iterate over balances that carry a deposit or a borrow.
    pub fn active_balances(&self) -> impl Iterator<Item = &Balance> {
        self.balances.iter().filter(|b| b.is_active())
    }

    pub fn has_liabilities(&self) -> bool {
        self.balances.iter().any(|b| !b.borrow.is_zero())
    }

    /// Apply a liquidation to a copy of the account state.
    ///
    /// Only the in-process ledger calls this, either on its own state during
    /// submission or on a throwaway copy during simulation.
    pub(crate) fn apply_liquidation(&mut self, ix: &LiquidationInstruction) -> Result<(), String> {
        if ix.asset_bank == ix.liability_bank {
            return Err("asset and liability bank must differ".to_string());
        }
        if ix.asset_amount.is_zero() {
            return Err("zero asset amount".to_string());
        }

        let liability = self
            .balance_mut(&ix.liability_bank)
            .ok_or_else(|| format!("no liability balance at bank {}", ix.liability_bank))?;
        if liability.borrow.is_zero() {
            return Err("liability already repaid".to_string());
        }
        if ix.repay_amount > liability.borrow {
            return Err(format!(
                "repay {} exceeds outstanding borrow {}",
                ix.repay_amount, liability.borrow
            ));
        }
        liability.borrow -= ix.repay_amount;

        let asset = self
            .balance_mut(&ix.asset_bank)
            .ok_or_else(|| format!("no asset balance at bank {}", ix.asset_bank))?;
        if asset.deposit < ix.asset_amount {
            return Err(format!(
                "insufficient collateral: {} < {}",
                asset.deposit, ix.asset_amount
            ));
        }
        asset.deposit -= ix.asset_amount;

        Ok(())
    }
}

/// Per-asset risk parameters of a lending bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankConfig {
    /// Bank address
    pub address: Address,
    /// Token mint held by the bank
    pub mint: Address,
    /// Token decimals
    pub decimals: u8,
    /// Initial asset weight (bps, <= 10000)
    pub asset_weight_init_bps: u32,
    /// Maintenance asset weight (bps, <= 10000)
    pub asset_weight_maint_bps: u32,
    /// Initial liability weight (bps, >= 10000)
    pub liability_weight_init_bps: u32,
    /// Maintenance liability weight (bps, >= 10000)
    pub liability_weight_maint_bps: u32,
    /// Deposit cap (native units)
    #[serde(default = "unlimited")]
    pub deposit_limit: U256,
    /// Borrow cap (native units)
    #[serde(default = "unlimited")]
    pub borrow_limit: U256,
    /// Oracle feed reference
    pub oracle: Address,
    /// Discount granted to the liquidator on seized collateral (bps)
    pub liquidation_discount_bps: u32,
}

fn unlimited() -> U256 {
    U256::MAX
}

impl BankConfig {
    /// Reject configurations the health math cannot interpret.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let invalid = |msg: &str| {
            Err(GatewayError::InvalidData(format!(
                "bank {}: {}",
                self.address, msg
            )))
        };

        if self.decimals > MAX_DECIMALS {
            return invalid("decimals out of range");
        }
        if self.asset_weight_init_bps > BPS_SCALE || self.asset_weight_maint_bps > BPS_SCALE {
            return invalid("asset weight above 100%");
        }
        if self.asset_weight_maint_bps < self.asset_weight_init_bps {
            return invalid("maintenance asset weight below initial");
        }
        if self.liability_weight_init_bps < BPS_SCALE || self.liability_weight_maint_bps < BPS_SCALE
        {
            return invalid("liability weight below 100%");
        }
        if self.liability_weight_maint_bps > self.liability_weight_init_bps {
            return invalid("maintenance liability weight above initial");
        }
        if self.liquidation_discount_bps >= BPS_SCALE {
            return invalid("liquidation discount must be below 100%");
        }
        Ok(())
    }
}

/// Liquidate `liquidatee`: repay debt at `liability_bank`, seize collateral
/// from `asset_bank`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationInstruction {
    pub liquidator_account: Address,
    pub liquidatee: Address,
    pub asset_bank: Address,
    pub liability_bank: Address,
    /// Collateral to seize (native units of the asset bank mint)
    pub asset_amount: U256,
    /// Debt to repay (native units of the liability bank mint)
    pub repay_amount: U256,
}

/// One leg of a swap instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
    pub venue: String,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
}

/// Swap seized collateral into the debt asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInstruction {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub min_output: U256,
    pub legs: Vec<SwapLeg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    Liquidate(LiquidationInstruction),
    Swap(SwapInstruction),
}

/// Transaction before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    /// Fee payer and signing authority
    pub authority: Address,
    /// Per-authority sequence number
    pub nonce: u64,
    pub instructions: Vec<Instruction>,
}

impl UnsignedTransaction {
    /// Canonical message bytes covered by the signature.
    pub fn message_bytes(&self) -> Result<Vec<u8>, GatewayError> {
        serde_json::to_vec(self).map_err(|e| GatewayError::InvalidData(e.to_string()))
    }

    /// Keccak256 digest of the message bytes.
    pub fn digest(&self) -> Result<B256, GatewayError> {
        Ok(keccak256(self.message_bytes()?))
    }
}

/// Transaction with its authority signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: UnsignedTransaction,
    /// 65-byte recoverable signature over [`UnsignedTransaction::digest`]
    pub signature: Bytes,
}

impl SignedTransaction {
    /// Hex form of the signature, used as the transaction identifier.
    pub fn signature_hex(&self) -> String {
        hex::encode(&self.signature)
    }
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub slot: u64,
    pub signature: String,
}

/// Outcome of a dry-run against current ledger state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub units_consumed: u64,
}

impl SimulationResult {
    pub fn ok(logs: Vec<String>, units_consumed: u64) -> Self {
        Self {
            success: true,
            error: None,
            logs,
            units_consumed,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            logs: Vec::new(),
            units_consumed: 0,
        }
    }
}
