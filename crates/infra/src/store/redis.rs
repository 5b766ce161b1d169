//! Redis-backed key-value store (optional, feature `redis`).
//!
//! Every `connect` opens a fresh TCP connection. `WATCH` state lives on the
//! server per connection, so connections are never pooled or shared between
//! ledger operations.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::instrument;

use super::r#trait::{KvConnection, KvStore, StoreError, Transaction, TxOp, TxOutcome};

#[derive(Debug, Clone)]
pub struct RedisKvStore {
    client: redis::Client,
}

impl RedisKvStore {
    /// Create a store for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// Only validates the URL; no connection is made until `connect`.
    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    type Connection = RedisConnection;

    #[instrument(skip(self))]
    async fn connect(&self) -> Result<Self::Connection, StoreError> {
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(RedisConnection { conn })
    }
}

pub struct RedisConnection {
    conn: MultiplexedConnection,
}

fn command_error(op: &str, e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        StoreError::Connection(format!("{op} failed: {e}"))
    } else {
        StoreError::Command(format!("{op} failed: {e}"))
    }
}

#[async_trait]
impl KvConnection for RedisConnection {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn
            .get(key)
            .await
            .map_err(|e| command_error("GET", e))
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn
            .set(key, value)
            .await
            .map_err(|e| command_error("SET", e))
    }

    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        redis::cmd("WATCH")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("WATCH", e))
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        redis::cmd("UNWATCH")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("UNWATCH", e))
    }

    async fn exec(&mut self, tx: Transaction) -> Result<TxOutcome, StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in tx.ops() {
            match op {
                TxOp::Set { key, value } => {
                    pipe.set(key, value);
                }
                TxOp::Get { key } => {
                    pipe.get(key);
                }
            }
        }

        // EXEC replies nil when a watched key changed.
        let replies: Option<Vec<Option<String>>> = pipe
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("EXEC", e))?;

        Ok(match replies {
            Some(replies) => TxOutcome::Committed(replies),
            None => TxOutcome::Aborted,
        })
    }

    async fn disconnect(self) -> Result<(), StoreError> {
        // Dropping the last handle closes the socket; the server discards watches.
        drop(self.conn);
        Ok(())
    }
}
