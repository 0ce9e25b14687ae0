//! Reconnect policy for consumers and producers.

use std::time::Duration;

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Backoff strategy for retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),

    /// Exponential backoff (base * 2^retry_count, capped at max)
    Exponential { base: Duration, max: Duration },

    /// Linear backoff (base * (retry_count + 1), capped at max)
    Linear { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay for a given retry count.
    pub fn delay(&self, retry_count: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential { base, max } => {
                let delay = base.saturating_mul(2u32.saturating_pow(retry_count));
                delay.min(*max)
            }
            BackoffStrategy::Linear { base, max } => {
                let delay = base.saturating_mul(retry_count.saturating_add(1));
                delay.min(*max)
            }
        }
    }
}

/// How a consumer or producer re-establishes its broker session.
///
/// The default waits five seconds between attempts and never gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: BackoffStrategy,
    /// Consecutive failed attempts tolerated before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Fixed delay, unlimited attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: BackoffStrategy::Fixed(delay),
            max_attempts: None,
        }
    }

    /// Exponential backoff, unlimited attempts.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            backoff: BackoffStrategy::Exponential { base, max },
            max_attempts: None,
        }
    }

    /// Stop after `attempts` consecutive failures.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay to wait after the given number of consecutive failures (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        self.backoff.delay(failures.saturating_sub(1))
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_fixed_five_seconds_forever() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(100), Duration::from_secs(5));
        assert!(policy.allows_retry(1_000_000));
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        };

        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(5), Duration::from_secs(30)); // Capped
    }

    #[test]
    fn test_backoff_linear() {
        let backoff = BackoffStrategy::Linear {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60),
        };

        assert_eq!(backoff.delay(0), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(15));
        assert_eq!(backoff.delay(20), Duration::from_secs(60)); // Capped
    }

    #[test]
    fn test_bounded_policy() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1))
            .with_max_attempts(3);

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }
}
