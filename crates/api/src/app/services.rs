use std::sync::Arc;

use chargeflow_accounting::{Balance, ChargeResult};
use chargeflow_core::AccountKey;
use chargeflow_infra::store::InMemoryKvStore;
use chargeflow_infra::{Ledger, LedgerError, RetryPolicy};

#[cfg(feature = "redis")]
use chargeflow_infra::store::RedisKvStore;

use crate::config::{ApiConfig, StoreBackend};

/// Ledger wired to the configured store.
///
/// One variant per backend keeps `Ledger` monomorphic (no boxed futures on the
/// hot path) while handlers stay backend-agnostic.
#[derive(Clone)]
pub enum AppServices {
    InMemory {
        ledger: Arc<Ledger<InMemoryKvStore>>,
    },
    #[cfg(feature = "redis")]
    Redis {
        ledger: Arc<Ledger<RedisKvStore>>,
    },
}

impl AppServices {
    pub fn in_memory(ledger: Ledger<InMemoryKvStore>) -> Self {
        Self::InMemory {
            ledger: Arc::new(ledger),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        match self {
            Self::InMemory { ledger } => ledger.retry_policy(),
            #[cfg(feature = "redis")]
            Self::Redis { ledger } => ledger.retry_policy(),
        }
    }

    pub async fn reset(&self, account: &AccountKey) -> Result<(), LedgerError> {
        match self {
            Self::InMemory { ledger } => ledger.reset(account).await,
            #[cfg(feature = "redis")]
            Self::Redis { ledger } => ledger.reset(account).await,
        }
    }

    pub async fn balance(&self, account: &AccountKey) -> Result<Balance, LedgerError> {
        match self {
            Self::InMemory { ledger } => ledger.get(account).await,
            #[cfg(feature = "redis")]
            Self::Redis { ledger } => ledger.get(account).await,
        }
    }

    pub async fn charge(
        &self,
        account: &AccountKey,
        amount: u64,
    ) -> Result<ChargeResult, LedgerError> {
        match self {
            Self::InMemory { ledger } => ledger.charge(account, amount).await,
            #[cfg(feature = "redis")]
            Self::Redis { ledger } => ledger.charge(account, amount).await,
        }
    }
}

pub fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let services = match &config.store {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; balances are not shared or persisted");
            AppServices::in_memory(
                Ledger::new(InMemoryKvStore::new()).with_retry_policy(config.retry.clone()),
            )
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis { url } => {
            let store = RedisKvStore::open(url)?;
            AppServices::Redis {
                ledger: Arc::new(Ledger::new(store).with_retry_policy(config.retry.clone())),
            }
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis { .. } => {
            anyhow::bail!("CHARGEFLOW_STORE=redis but the redis feature is not enabled")
        }
    };

    let retry = services.retry_policy();
    tracing::info!(
        store = config.store.label(),
        max_retries = retry.max_retries,
        min_backoff_ms = retry.min_delay.as_millis() as u64,
        max_backoff_ms = retry.max_delay.as_millis() as u64,
        "ledger ready"
    );
    Ok(services)
}
