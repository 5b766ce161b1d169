use serde::{Deserialize, Serialize};

use chargeflow_core::{AccountKey, DomainError, DomainResult};

/// Balance every account is set to by a reset.
pub const DEFAULT_BALANCE: Balance = Balance(100);

/// Non-negative number of credits held by an account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(u64);

impl Balance {
    pub const fn new(credits: u64) -> Self {
        Self(credits)
    }

    pub fn credits(self) -> u64 {
        self.0
    }

    /// Balance left after deducting `amount`, or `None` if it would go below zero.
    pub fn checked_sub(self, amount: u64) -> Option<Balance> {
        self.0.checked_sub(amount).map(Balance)
    }

    /// Decode the textual form kept in the store.
    ///
    /// Anything other than a plain non-negative decimal integer is malformed;
    /// it is never coerced to zero.
    pub fn parse_stored(raw: &str) -> DomainResult<Self> {
        raw.parse::<u64>()
            .map(Balance)
            .map_err(|e| DomainError::malformed(format!("balance {raw:?}: {e}")))
    }

    /// Encode for the store.
    pub fn to_stored(self) -> String {
        self.0.to_string()
    }
}

impl core::fmt::Display for Balance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Balance> for u64 {
    fn from(value: Balance) -> Self {
        value.0
    }
}

/// Store key holding an account's balance: `<account>/balance`.
pub fn balance_key(account: &AccountKey) -> String {
    format!("{account}/balance")
}
