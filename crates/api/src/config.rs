//! Process configuration, read from the environment at startup.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};

use chargeflow_infra::RetryPolicy;

/// Which key-value store backs the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store; balances vanish on restart. For dev/test.
    Memory,
    /// Shared Redis at `url`, e.g. `redis://localhost:6379`.
    Redis { url: String },
}

impl StoreBackend {
    pub fn label(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Redis { .. } => "redis",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub store: StoreBackend,
    pub retry: RetryPolicy,
}

impl ApiConfig {
    /// Load from process environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CHARGEFLOW_STORE` | `redis` (`memory` for a process-local store) |
    /// | `REDIS_HOST` / `REDIS_PORT` | `localhost` / `6379` |
    /// | `BIND_ADDR` | `0.0.0.0:8080` |
    /// | `CHARGE_MAX_RETRIES` | `10` |
    /// | `CHARGE_MIN_BACKOFF_MS` / `CHARGE_MAX_BACKOFF_MS` | `3` / `10` |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be host:port")?;

        let store = match lookup("CHARGEFLOW_STORE").as_deref() {
            None | Some("redis") => {
                let host = lookup("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
                let port = match lookup("REDIS_PORT") {
                    Some(p) => p.parse::<u16>().context("REDIS_PORT must be a port number")?,
                    None => 6379,
                };
                StoreBackend::Redis {
                    url: format!("redis://{host}:{port}"),
                }
            }
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("CHARGEFLOW_STORE must be 'redis' or 'memory', got {other:?}"),
        };

        let defaults = RetryPolicy::default();
        let max_retries = parse_or(&lookup, "CHARGE_MAX_RETRIES", defaults.max_retries)?;
        let min_ms = parse_or(
            &lookup,
            "CHARGE_MIN_BACKOFF_MS",
            defaults.min_delay.as_millis() as u64,
        )?;
        let max_ms = parse_or(
            &lookup,
            "CHARGE_MAX_BACKOFF_MS",
            defaults.max_delay.as_millis() as u64,
        )?;
        let retry = RetryPolicy::exponential(
            max_retries,
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
        )?;

        Ok(Self {
            bind_addr,
            store,
            retry,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        None => Ok(default),
    }
}
