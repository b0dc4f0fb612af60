//! Per-account execution locks.
//!
//! At most one liquidation attempt per account is in flight at any time. The
//! lock is held by an [`ExecutionGuard`] and released when the guard drops, so
//! every exit path of an attempt (success, error, panic, cancellation)
//! releases it.

use alloy::primitives::Address;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Process-wide lock table.
#[derive(Debug, Default)]
pub struct ExecutionLocks {
    held: DashMap<Address, Instant>,
}

impl ExecutionLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the lock for `account`, or `None` if an attempt already holds it.
    pub fn try_acquire(self: &Arc<Self>, account: Address) -> Option<ExecutionGuard> {
        match self.held.entry(account) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                trace!(account = %account, "Execution lock acquired");
                Some(ExecutionGuard {
                    locks: Arc::clone(self),
                    account,
                })
            }
        }
    }

    pub fn is_locked(&self, account: &Address) -> bool {
        self.held.contains_key(account)
    }

    /// How long `account` has been locked.
    pub fn held_for(&self, account: &Address) -> Option<Duration> {
        self.held.get(account).map(|since| since.elapsed())
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Releases the account lock on drop.
#[derive(Debug)]
pub struct ExecutionGuard {
    locks: Arc<ExecutionLocks>,
    account: Address,
}

impl ExecutionGuard {
    pub fn account(&self) -> Address {
        self.account
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.locks.held.remove(&self.account);
        trace!(account = %self.account, "Execution lock released");
    }
}
