//! Accounting module (prepaid credit balances).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. The store
//! protocol that makes charges safe under concurrency lives in `chargeflow-infra`.

pub mod balance;
pub mod charge;

pub use balance::{balance_key, Balance, DEFAULT_BALANCE};
pub use charge::{decide_charge, ChargeDecision, ChargeResult};
