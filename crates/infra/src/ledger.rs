//! Balance operations over a shared key-value store.
//!
//! The store is the only source of truth: every call re-reads it, nothing is
//! cached between requests, and several service instances may run this code
//! against the same keys at once.
//!
//! ## Charge protocol
//!
//! The store has no "decrement if sufficient" command, so a charge is built from
//! its optimistic lock:
//!
//! ```text
//! WATCH <account>/balance
//!   ↓
//! GET   (current balance, on the watching connection)
//!   ↓
//! balance < amount ──→ UNWATCH, reject (nothing written, no retry)
//!   ↓
//! MULTI; SET balance-amount; GET; EXEC
//!   ↓
//! EXEC aborted (key changed since WATCH) ──→ back off, start over from WATCH
//!   ↓
//! authorized, with the balance confirmed by the transaction's GET
//! ```
//!
//! A restart redoes the whole read-decide-commit cycle, because the funds check
//! was made against a value that is now stale. Retries are bounded by
//! [`RetryPolicy`]; running out is reported as
//! [`LedgerError::ConflictExhausted`], never as insufficient funds.
//!
//! ## Connections
//!
//! Each operation opens its own connection (watches are per connection) and
//! disconnects on every exit path, including errors.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use chargeflow_accounting::{
    balance_key, decide_charge, Balance, ChargeDecision, ChargeResult, DEFAULT_BALANCE,
};
use chargeflow_core::AccountKey;

use crate::retry::RetryPolicy;
use crate::store::{KvConnection, KvStore, StoreError, Transaction, TxOutcome};

/// Ledger operation error.
///
/// Insufficient funds is deliberately absent: it is a normal, non-authorized
/// [`ChargeResult`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store could not be reached or rejected a command.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Every attempt lost the race against concurrent writers. Safe to retry later.
    #[error("charge on account '{account}' conflicted {attempts} times; giving up")]
    ConflictExhausted { account: AccountKey, attempts: u32 },

    /// No balance is stored for the account (it was never reset).
    #[error("account '{account}' is not initialized")]
    NotInitialized { account: AccountKey },

    /// The stored balance is not a non-negative integer.
    #[error("malformed balance at '{key}': {value:?}")]
    MalformedState { key: String, value: String },
}

/// One pass through the charge protocol.
enum Attempt {
    Done(ChargeResult),
    Conflict,
}

/// Per-account credit balances with concurrency-safe charges.
///
/// Cheap to share behind an `Arc`; holds no per-request state.
#[derive(Debug)]
pub struct Ledger<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl<S> Ledger<S>
where
    S: KvStore,
{
    /// Set the account's balance to [`DEFAULT_BALANCE`], whatever it was.
    #[instrument(skip(self, account), fields(account = %account))]
    pub async fn reset(&self, account: &AccountKey) -> Result<(), LedgerError> {
        let mut conn = self.store.connect().await?;
        let result = conn
            .set(&balance_key(account), &DEFAULT_BALANCE.to_stored())
            .await;
        release(conn).await;
        result?;

        info!(balance = %DEFAULT_BALANCE, "account reset");
        Ok(())
    }

    /// Current balance of the account.
    #[instrument(skip(self, account), fields(account = %account))]
    pub async fn get(&self, account: &AccountKey) -> Result<Balance, LedgerError> {
        let mut conn = self.store.connect().await?;
        let result = read_balance(&mut conn, account, &balance_key(account)).await;
        release(conn).await;
        result
    }

    /// Deduct `amount` if the balance covers it, atomically with respect to every
    /// other charge on the same account.
    #[instrument(skip(self, account), fields(account = %account))]
    pub async fn charge(
        &self,
        account: &AccountKey,
        amount: u64,
    ) -> Result<ChargeResult, LedgerError> {
        let mut conn = self.store.connect().await?;
        let result = self.charge_with_retry(&mut conn, account, amount).await;
        release(conn).await;

        let result = result?;
        info!(
            charges = result.charges,
            balance = result.remaining_balance,
            authorized = result.is_authorized,
            "charge settled"
        );
        Ok(result)
    }

    async fn charge_with_retry(
        &self,
        conn: &mut S::Connection,
        account: &AccountKey,
        amount: u64,
    ) -> Result<ChargeResult, LedgerError> {
        let key = balance_key(account);
        let mut retries = 0u32;

        loop {
            match try_charge(conn, account, &key, amount).await? {
                Attempt::Done(result) => return Ok(result),
                Attempt::Conflict if self.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for_retry(retries);
                    debug!(
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "balance changed during charge; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Conflict => {
                    let attempts = retries + 1;
                    warn!(attempts, "charge abandoned under contention");
                    return Err(LedgerError::ConflictExhausted {
                        account: account.clone(),
                        attempts,
                    });
                }
            }
        }
    }
}

async fn try_charge<C>(
    conn: &mut C,
    account: &AccountKey,
    key: &str,
    amount: u64,
) -> Result<Attempt, LedgerError>
where
    C: KvConnection,
{
    conn.watch(key).await?;
    // On error the watch goes away with the connection.
    let balance = read_balance(conn, account, key).await?;

    let new_balance = match decide_charge(balance, amount) {
        ChargeDecision::Reject => {
            conn.unwatch().await?;
            return Ok(Attempt::Done(ChargeResult::rejected(balance)));
        }
        ChargeDecision::Authorize { new_balance } => new_balance,
    };

    let tx = Transaction::multi()
        .set(key, new_balance.to_stored())
        .get(key);

    match conn.exec(tx).await? {
        TxOutcome::Aborted => Ok(Attempt::Conflict),
        TxOutcome::Committed(replies) => {
            let confirmed = match replies.get(1) {
                Some(Some(raw)) => parse_balance(key, raw)?,
                _ => {
                    return Err(StoreError::Command(format!(
                        "EXEC returned {replies:?}; expected SET and GET replies"
                    ))
                    .into());
                }
            };
            Ok(Attempt::Done(ChargeResult::authorized(confirmed, amount)))
        }
    }
}

async fn read_balance<C>(
    conn: &mut C,
    account: &AccountKey,
    key: &str,
) -> Result<Balance, LedgerError>
where
    C: KvConnection,
{
    match conn.get(key).await? {
        Some(raw) => parse_balance(key, &raw),
        None => Err(LedgerError::NotInitialized {
            account: account.clone(),
        }),
    }
}

fn parse_balance(key: &str, raw: &str) -> Result<Balance, LedgerError> {
    Balance::parse_stored(raw).map_err(|_| LedgerError::MalformedState {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

async fn release<C>(conn: C)
where
    C: KvConnection,
{
    if let Err(e) = conn.disconnect().await {
        warn!(error = %e, "failed to disconnect from store");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::store::{InMemoryConnection, InMemoryKvStore};

    fn account(name: &str) -> AccountKey {
        AccountKey::new(name).unwrap()
    }

    fn ledger() -> Ledger<InMemoryKvStore> {
        Ledger::new(InMemoryKvStore::new())
    }

    #[tokio::test]
    async fn reset_then_get_yields_default_balance() {
        let ledger = ledger();
        let acc = account("acc");

        ledger.reset(&acc).await.unwrap();
        ledger.charge(&acc, 70).await.unwrap();
        ledger.reset(&acc).await.unwrap();

        assert_eq!(ledger.get(&acc).await.unwrap(), DEFAULT_BALANCE);
        assert_eq!(ledger.store().open_connections(), 0);
    }

    #[tokio::test]
    async fn sequential_scenario_authorizes_and_rejects() {
        let ledger = ledger();
        let acc = account("acc");
        ledger.reset(&acc).await.unwrap();

        let first = ledger.charge(&acc, 60).await.unwrap();
        assert_eq!(first, ChargeResult::authorized(Balance::new(40), 60));

        let second = ledger.charge(&acc, 60).await.unwrap();
        assert_eq!(second, ChargeResult::rejected(Balance::new(40)));
        assert_eq!(ledger.get(&acc).await.unwrap(), Balance::new(40));

        let third = ledger.charge(&acc, 40).await.unwrap();
        assert_eq!(third, ChargeResult::authorized(Balance::new(0), 40));
        assert_eq!(ledger.store().peek("acc/balance").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn never_reset_account_is_not_initialized() {
        let ledger = ledger();
        let acc = account("ghost");

        assert!(matches!(
            ledger.get(&acc).await,
            Err(LedgerError::NotInitialized { account }) if account == acc
        ));
        assert!(matches!(
            ledger.charge(&acc, 10).await,
            Err(LedgerError::NotInitialized { .. })
        ));
        assert_eq!(ledger.store().peek("ghost/balance"), None);
        assert_eq!(ledger.store().open_connections(), 0);
    }

    #[tokio::test]
    async fn garbage_balance_is_malformed_not_zero() {
        let ledger = ledger();
        let acc = account("acc");
        let mut conn = ledger.store().connect().await.unwrap();
        conn.set("acc/balance", "lots").await.unwrap();
        conn.disconnect().await.unwrap();

        match ledger.get(&acc).await {
            Err(LedgerError::MalformedState { key, value }) => {
                assert_eq!(key, "acc/balance");
                assert_eq!(value, "lots");
            }
            other => panic!("expected MalformedState, got {other:?}"),
        }
        assert!(matches!(
            ledger.charge(&acc, 1).await,
            Err(LedgerError::MalformedState { .. })
        ));
        assert_eq!(ledger.store().peek("acc/balance").as_deref(), Some("lots"));
        assert_eq!(ledger.store().open_connections(), 0);
    }

    #[tokio::test]
    async fn outage_fails_every_operation_without_mutation() {
        let ledger = ledger();
        let acc = account("acc");
        ledger.reset(&acc).await.unwrap();
        ledger.charge(&acc, 25).await.unwrap();

        ledger.store().set_available(false);
        assert!(matches!(ledger.reset(&acc).await, Err(LedgerError::StoreUnavailable(_))));
        assert!(matches!(ledger.get(&acc).await, Err(LedgerError::StoreUnavailable(_))));
        assert!(matches!(
            ledger.charge(&acc, 10).await,
            Err(LedgerError::StoreUnavailable(_))
        ));

        ledger.store().set_available(true);
        assert_eq!(ledger.get(&acc).await.unwrap(), Balance::new(75));
        assert_eq!(ledger.store().open_connections(), 0);
    }

    /// Store whose transactions always lose the race.
    struct AlwaysConflicting {
        inner: InMemoryKvStore,
        execs: Arc<AtomicU32>,
    }

    struct ConflictingConnection {
        inner: InMemoryConnection,
        execs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl KvStore for AlwaysConflicting {
        type Connection = ConflictingConnection;

        async fn connect(&self) -> Result<Self::Connection, StoreError> {
            Ok(ConflictingConnection {
                inner: self.inner.connect().await?,
                execs: Arc::clone(&self.execs),
            })
        }
    }

    #[async_trait]
    impl KvConnection for ConflictingConnection {
        async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
            self.inner.watch(key).await
        }

        async fn unwatch(&mut self) -> Result<(), StoreError> {
            self.inner.unwatch().await
        }

        async fn exec(&mut self, _tx: Transaction) -> Result<TxOutcome, StoreError> {
            self.execs.fetch_add(1, Ordering::SeqCst);
            self.inner.unwatch().await?;
            Ok(TxOutcome::Aborted)
        }

        async fn disconnect(self) -> Result<(), StoreError> {
            self.inner.disconnect().await
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_conflict_not_rejection() {
        let inner = InMemoryKvStore::new();
        let execs = Arc::new(AtomicU32::new(0));
        let ledger = Ledger::new(AlwaysConflicting {
            inner: inner.clone(),
            execs: Arc::clone(&execs),
        })
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(1)));
        let acc = account("hot");
        ledger.reset(&acc).await.unwrap();

        match ledger.charge(&acc, 10).await {
            Err(LedgerError::ConflictExhausted { account, attempts }) => {
                assert_eq!(account, acc);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected ConflictExhausted, got {other:?}"),
        }
        assert_eq!(execs.load(Ordering::SeqCst), 4);
        assert_eq!(inner.peek("hot/balance").as_deref(), Some("100"));
        assert_eq!(inner.open_connections(), 0);
    }

    #[tokio::test]
    async fn insufficient_funds_never_stages_a_transaction() {
        let inner = InMemoryKvStore::new();
        let execs = Arc::new(AtomicU32::new(0));
        let ledger = Ledger::new(AlwaysConflicting {
            inner,
            execs: Arc::clone(&execs),
        });
        let acc = account("poor");
        ledger.reset(&acc).await.unwrap();

        let result = ledger.charge(&acc, 101).await.unwrap();
        assert_eq!(result, ChargeResult::rejected(DEFAULT_BALANCE));
        assert_eq!(execs.load(Ordering::SeqCst), 0);
    }

    /// Counts ERROR events; failures are logged once, by whoever handles them.
    struct ErrorEvents(Arc<AtomicU32>);

    impl<Sub: tracing::Subscriber> tracing_subscriber::Layer<Sub> for ErrorEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, Sub>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn failed_operations_leave_error_logging_to_the_caller() {
        use tracing_subscriber::layer::SubscriberExt;

        let errors = Arc::new(AtomicU32::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorEvents(Arc::clone(&errors)));
        let _guard = tracing::subscriber::set_default(subscriber);

        let ledger = ledger();
        let acc = account("ghost");
        assert!(ledger.get(&acc).await.is_err());
        assert!(ledger.charge(&acc, 5).await.is_err());

        ledger.store().set_available(false);
        assert!(ledger.reset(&acc).await.is_err());

        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }
}
