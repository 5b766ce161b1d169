use async_trait::async_trait;
use thiserror::Error;

/// Key-value store failure.
///
/// These are **infrastructure errors** (transport, command rejection). A commit
/// aborted by the watch fence is not an error; it is reported as
/// [`TxOutcome::Aborted`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),
}

/// One staged command inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    Set { key: String, value: String },
    Get { key: String },
}

/// Commands queued for atomic execution (`MULTI ... EXEC`).
///
/// Nothing is sent until [`KvConnection::exec`]; the whole batch then applies
/// all-or-nothing, and only if no watched key changed since `WATCH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    pub fn multi() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(TxOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.ops.push(TxOp::Get { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[TxOp] {
        &self.ops
    }
}

/// Result of executing a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Every op applied. One reply per op, in order: `Some("OK")` for `Set`,
    /// the value (or `None` if absent) for `Get`.
    Committed(Vec<Option<String>>),
    /// A watched key was modified by someone else; nothing was applied.
    Aborted,
}

/// A single, exclusively-owned connection to the store.
///
/// Watches are scoped to the connection, which is why every ledger operation
/// opens its own and never shares it.
#[async_trait]
pub trait KvConnection: Send {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Start monitoring `key`; a later `exec` aborts if it changes first.
    async fn watch(&mut self, key: &str) -> Result<(), StoreError>;

    /// Drop every watch held by this connection.
    async fn unwatch(&mut self) -> Result<(), StoreError>;

    /// Run the staged commands atomically. Clears all watches either way.
    async fn exec(&mut self, tx: Transaction) -> Result<TxOutcome, StoreError>;

    /// Close the connection. Watches are released with it.
    async fn disconnect(self) -> Result<(), StoreError>;
}

/// Connection factory for a networked key-value store.
///
/// Implementations:
/// - [`InMemoryKvStore`](super::InMemoryKvStore) for tests/dev
/// - `RedisKvStore` (feature `redis`) for production
#[async_trait]
pub trait KvStore: Send + Sync {
    type Connection: KvConnection + 'static;

    async fn connect(&self) -> Result<Self::Connection, StoreError>;
}

#[async_trait]
impl<S> KvStore for std::sync::Arc<S>
where
    S: KvStore + ?Sized,
{
    type Connection = S::Connection;

    async fn connect(&self) -> Result<Self::Connection, StoreError> {
        (**self).connect().await
    }
}
