//! Infrastructure layer: key-value store adapters, retry policy, and the ledger
//! service that runs the charge protocol over them.

pub mod ledger;
pub mod retry;
pub mod store;

pub use ledger::{Ledger, LedgerError};
pub use retry::{BackoffStrategy, InvalidRetryPolicy, RetryPolicy};
