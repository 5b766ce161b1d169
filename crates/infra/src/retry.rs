//! Retry/backoff policy for optimistic-concurrency conflicts.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: min * 2^(retry-1)
    #[default]
    Exponential,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid retry policy: {0}")]
pub struct InvalidRetryPolicy(String);

/// How many times a conflicted charge is re-run, and how long to wait in between.
///
/// The default matches the store-contention profile the ledger was tuned for:
/// up to 10 retries, each delayed by 3..=10ms with randomization so colliding
/// writers spread out instead of retrying in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_retries: u32,
    /// Delay before the first retry, and floor for every retry
    pub min_delay: Duration,
    /// Cap applied after backoff and randomization
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Multiply each delay by a random factor in [1, 2)
    pub randomize: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            min_delay: Duration::from_millis(3),
            max_delay: Duration::from_millis(10),
            strategy: BackoffStrategy::Exponential,
            randomize: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed, non-random delays.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            min_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            randomize: false,
        }
    }

    /// Create a randomized exponential policy bounded by `[min_delay, max_delay]`.
    pub fn exponential(
        max_retries: u32,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, InvalidRetryPolicy> {
        let policy = Self {
            max_retries,
            min_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            randomize: true,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), InvalidRetryPolicy> {
        if self.min_delay > self.max_delay {
            return Err(InvalidRetryPolicy(format!(
                "min_delay {:?} exceeds max_delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Check if another retry is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Delay before retry number `retry` (1-indexed), before randomization.
    pub fn base_delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.min_delay,
            BackoffStrategy::Exponential => {
                let exp = 2u32.saturating_pow(retry - 1);
                self.min_delay.saturating_mul(exp)
            }
        };

        delay.min(self.max_delay)
    }

    /// Delay before retry number `retry` (1-indexed), randomized if enabled.
    ///
    /// Always within `[min_delay, max_delay]` for `retry >= 1`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.base_delay_for_retry(retry);
        if !self.randomize || base.is_zero() {
            return base;
        }

        let factor = rand::thread_rng().gen_range(1.0..2.0);
        base.mul_f64(factor).max(self.min_delay).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            min_delay: Duration::from_millis(3),
            max_delay: Duration::from_millis(10),
            strategy: BackoffStrategy::Exponential,
            randomize: false,
        };

        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(3));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(6));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(10));
        assert_eq!(policy.delay_for_retry(30), Duration::from_millis(10));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(5));

        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(5));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(5));
    }

    #[test]
    fn randomized_delays_stay_within_bounds() {
        let policy = RetryPolicy::default();

        for retry in 1..=policy.max_retries {
            for _ in 0..50 {
                let d = policy.delay_for_retry(retry);
                assert!(d >= policy.min_delay, "{d:?} below floor on retry {retry}");
                assert!(d <= policy.max_delay, "{d:?} above cap on retry {retry}");
            }
        }
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = RetryPolicy::exponential(
            10,
            Duration::from_millis(20),
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds max_delay"));
    }
}
