use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::r#trait::{KvConnection, KvStore, StoreError, Transaction, TxOp, TxOutcome};

#[derive(Debug)]
struct Entry {
    value: String,
    /// Bumped on every write; what `WATCH` snapshots.
    version: u64,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    next_version: u64,
}

impl Keyspace {
    /// Version 0 stands for "absent"; any write moves a key past it.
    fn version_of(&self, key: &str) -> u64 {
        self.entries.get(key).map(|e| e.version).unwrap_or(0)
    }

    fn write(&mut self, key: &str, value: &str) {
        self.next_version += 1;
        let version = self.next_version;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                version,
            },
        );
    }

    fn read(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.value.clone())
    }
}

#[derive(Debug)]
struct Shared {
    keyspace: Mutex<Keyspace>,
    available: AtomicBool,
    open_connections: AtomicUsize,
}

/// In-memory key-value store with Redis-style `WATCH`/`MULTI`/`EXEC` semantics.
///
/// Intended for tests/dev. Each operation yields to the scheduler before touching
/// the keyspace so concurrent tasks interleave the way network round-trips would.
#[derive(Debug, Clone)]
pub struct InMemoryKvStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared {
                keyspace: Mutex::new(Keyspace::default()),
                available: AtomicBool::new(true),
                open_connections: AtomicUsize::new(0),
            }),
        }
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable, `connect` and every command fail
    /// with [`StoreError::Connection`].
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Connections handed out by `connect` and not yet `disconnect`ed.
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Read a key without going through a connection (test inspection).
    pub fn peek(&self, key: &str) -> Option<String> {
        self.shared
            .keyspace
            .lock()
            .ok()
            .and_then(|ks| ks.read(key))
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, StoreError> {
        tokio::task::yield_now().await;
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }

        self.shared.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryConnection {
            shared: Arc::clone(&self.shared),
            watched: HashMap::new(),
        })
    }
}

/// Connection to an [`InMemoryKvStore`]; owns its own watch set.
#[derive(Debug)]
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    watched: HashMap<String, u64>,
}

impl InMemoryConnection {
    async fn round_trip(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection reset".to_string()));
        }
        Ok(())
    }

    fn keyspace(&self) -> Result<std::sync::MutexGuard<'_, Keyspace>, StoreError> {
        self.shared
            .keyspace
            .lock()
            .map_err(|_| StoreError::Command("lock poisoned".to_string()))
    }
}

#[async_trait]
impl KvConnection for InMemoryConnection {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.round_trip().await?;
        Ok(self.keyspace()?.read(key))
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.round_trip().await?;
        self.keyspace()?.write(key, value);
        Ok(())
    }

    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        self.round_trip().await?;
        let version = self.keyspace()?.version_of(key);
        self.watched.entry(key.to_string()).or_insert(version);
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        self.round_trip().await?;
        self.watched.clear();
        Ok(())
    }

    async fn exec(&mut self, tx: Transaction) -> Result<TxOutcome, StoreError> {
        self.round_trip().await?;

        let watched = std::mem::take(&mut self.watched);
        let mut keyspace = self.keyspace()?;

        let dirty = watched
            .iter()
            .any(|(key, version)| keyspace.version_of(key) != *version);
        if dirty {
            return Ok(TxOutcome::Aborted);
        }

        let mut replies = Vec::with_capacity(tx.ops().len());
        for op in tx.ops() {
            match op {
                TxOp::Set { key, value } => {
                    keyspace.write(key, value);
                    replies.push(Some("OK".to_string()));
                }
                TxOp::Get { key } => replies.push(keyspace.read(key)),
            }
        }

        Ok(TxOutcome::Committed(replies))
    }

    async fn disconnect(mut self) -> Result<(), StoreError> {
        self.watched.clear();
        self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
