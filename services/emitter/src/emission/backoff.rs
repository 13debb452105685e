//! Retry timing for publishes.

use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff with symmetric jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,

    /// Upper bound before jitter.
    pub max: Duration,

    /// Fraction of the delay added or removed at random, clamped to `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let nominal = self.base.saturating_mul(factor).min(self.max);

        let spread = nominal.as_secs_f64() * self.jitter.clamp(0.0, 1.0);
        if spread <= 0.0 {
            return nominal;
        }

        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((nominal.as_secs_f64() + offset).max(0.0))
    }
}

/// How often a single message is attempted.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first; values below 1 count as 1.
    pub max_attempts: u32,

    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` have failed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within(d: Duration, low_ms: u64, high_ms: u64) -> bool {
        d >= Duration::from_millis(low_ms) && d <= Duration::from_millis(high_ms)
    }

    #[test]
    fn test_delay_doubles_with_jitter() {
        let policy = BackoffPolicy::default();

        for _ in 0..20 {
            assert!(within(policy.delay(0), 74, 126));
            assert!(within(policy.delay(1), 149, 251));
            assert!(within(policy.delay(3), 599, 1001));
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(250),
            max: Duration::from_secs(2),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(3), Duration::from_secs(2));
        assert_eq!(policy.delay(40), Duration::from_secs(2));
    }

    #[test]
    fn test_should_retry_counts_first_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        let once = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!once.should_retry(1));
    }
}
