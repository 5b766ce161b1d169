use serde::{Deserialize, Serialize};

use crate::balance::Balance;

/// Outcome of a charge, as returned to callers.
///
/// A rejection for insufficient funds is a normal result (`is_authorized == false`),
/// not an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeResult {
    pub is_authorized: bool,
    /// Balance after the charge, or the untouched balance when rejected.
    pub remaining_balance: u64,
    /// Credits actually deducted (0 when rejected).
    pub charges: u64,
}

impl ChargeResult {
    pub fn authorized(remaining: Balance, charges: u64) -> Self {
        Self {
            is_authorized: true,
            remaining_balance: remaining.credits(),
            charges,
        }
    }

    pub fn rejected(balance: Balance) -> Self {
        Self {
            is_authorized: false,
            remaining_balance: balance.credits(),
            charges: 0,
        }
    }
}

/// What to do with a charge given the balance it was read against.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChargeDecision {
    /// Commit `new_balance` (guarded by the store's watch fence).
    Authorize { new_balance: Balance },
    /// Insufficient funds; nothing is written.
    Reject,
}

/// Pure authorization rule: a charge fits iff `balance >= amount`.
pub fn decide_charge(balance: Balance, amount: u64) -> ChargeDecision {
    match balance.checked_sub(amount) {
        Some(new_balance) => ChargeDecision::Authorize { new_balance },
        None => ChargeDecision::Reject,
    }
}
