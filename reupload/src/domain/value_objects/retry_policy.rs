//! Retry policy value object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::FailureCode;

/// Retry budget and backoff shared by the media step and every publish attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first try.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any computed delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential growth factor between consecutive retries.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to computed delays.
    #[serde(default = "default_true")]
    pub use_jitter: bool,
    /// Delay used after a rate-limit denial, so the window has a chance to roll over.
    #[serde(default = "default_rate_limited_delay_ms")]
    pub rate_limited_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_rate_limited_delay_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: default_true(),
            rate_limited_delay_ms: default_rate_limited_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given budget and the default backoff.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Policy with the given budget and no delay between retries.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            use_jitter: false,
            rate_limited_delay_ms: 0,
        }
    }

    /// Whether another retry is allowed after `retries_used` retries.
    pub fn should_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }

    /// Backoff before retry number `retries_used + 1`, chosen by failure reason.
    pub fn delay_for(&self, retries_used: u32, reason: FailureCode) -> Duration {
        if reason == FailureCode::RateLimited {
            return Duration::from_millis(self.rate_limited_delay_ms);
        }

        let exponent = retries_used.min(i32::MAX as u32) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = base.min(self.max_delay_ms as f64).max(0.0) as u64;

        if self.use_jitter && delay_ms > 0 {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            Duration::from_millis(delay_ms + jitter)
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    /// Upper bound of the time one attempt may spend backing off (excluding rate-limit waits).
    pub fn max_total_delay(&self) -> Duration {
        let total: u64 = (0..self.max_retries)
            .map(|n| {
                let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(n as i32);
                base.min(self.max_delay_ms as f64) as u64
            })
            .sum();
        if self.use_jitter {
            Duration::from_millis((total as f64 * 1.25) as u64)
        } else {
            Duration::from_millis(total)
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(crate::Error::validation(
                "retry backoff multiplier must be a finite number >= 1.0",
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(crate::Error::validation(
                "retry initial delay must not exceed the maximum delay",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 500,
            max_delay_ms: 3000,
            backoff_multiplier: 2.0,
            use_jitter: false,
            rate_limited_delay_ms: 10_000,
        }
    }

    #[test]
    fn test_budget() {
        let policy = RetryPolicy::with_max_retries(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = fixed();
        let code = FailureCode::NetworkError;
        assert_eq!(policy.delay_for(0, code), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, code), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2, code), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3, code), Duration::from_millis(3000));
        assert_eq!(policy.delay_for(9, code), Duration::from_millis(3000));
    }

    #[test]
    fn test_rate_limited_uses_dedicated_delay() {
        let policy = fixed();
        assert_eq!(
            policy.delay_for(0, FailureCode::RateLimited),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy {
            use_jitter: true,
            ..fixed()
        };
        for _ in 0..20 {
            let delay = policy.delay_for(0, FailureCode::RemoteRejected);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(625));
        }
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay_for(2, FailureCode::NetworkError), Duration::ZERO);
        assert_eq!(policy.delay_for(0, FailureCode::RateLimited), Duration::ZERO);
        assert_eq!(policy.max_total_delay(), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let policy = RetryPolicy {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let policy: RetryPolicy = toml::from_str("max_retries = 1").unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.rate_limited_delay_ms, 60_000);
    }
}
