//! Key-value store boundary.
//!
//! The ledger needs exactly what Redis offers: plain `GET`/`SET` plus an
//! optimistic lock (`WATCH` + `MULTI`/`EXEC`). This module defines that
//! capability as traits so the protocol can run against an in-memory store in
//! tests and against Redis in production.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod r#trait;

pub use in_memory::{InMemoryConnection, InMemoryKvStore};
#[cfg(feature = "redis")]
pub use self::redis::{RedisConnection, RedisKvStore};
pub use r#trait::{KvConnection, KvStore, StoreError, Transaction, TxOp, TxOutcome};
