//! Retry policy applied when a job attempt fails.

use crate::config::{BackoffKind, QueueConfig};
use std::time::Duration;

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed { delay: Duration },
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            BackoffStrategy::Fixed { delay } => delay,
            BackoffStrategy::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent)
                    .map(|delay| delay.min(max))
                    .unwrap_or(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

/// What the queue did with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { attempt: u32, delay: Duration },
    DeadLettered { attempts: u32 },
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        let backoff = match config.backoff.strategy {
            BackoffKind::Fixed => BackoffStrategy::Fixed {
                delay: Duration::from_millis(config.backoff.delay_ms),
            },
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                base: Duration::from_millis(config.backoff.delay_ms),
                max: Duration::from_millis(config.backoff.max_delay_ms),
            },
        };
        Self {
            max_attempts: config.max_attempts,
            backoff,
        }
    }

    /// Wait before re-claiming a job whose entity another job has leased
    pub fn lease_wait(&self) -> Duration {
        self.backoff.delay_for(1)
    }

    /// Decide the fate of a job whose `attempts`-th attempt just failed
    pub fn on_failure(&self, attempts: u32, retryable: bool) -> FailureOutcome {
        if retryable && attempts < self.max_attempts {
            FailureOutcome::Retrying {
                attempt: attempts,
                delay: self.backoff.delay_for(attempts),
            }
        } else {
            FailureOutcome::DeadLettered { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = BackoffStrategy::Fixed {
            delay: Duration::from_millis(250),
        };
        assert_eq!(backoff.delay_for(1), backoff.delay_for(7));
    }

    #[test]
    fn test_failure_outcomes() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: BackoffStrategy::Fixed {
                delay: Duration::from_millis(10),
            },
        };
        assert!(matches!(
            policy.on_failure(1, true),
            FailureOutcome::Retrying { attempt: 1, .. }
        ));
        assert_eq!(
            policy.on_failure(3, true),
            FailureOutcome::DeadLettered { attempts: 3 }
        );
        assert_eq!(
            policy.on_failure(1, false),
            FailureOutcome::DeadLettered { attempts: 1 }
        );
    }

    #[test]
    fn test_policy_from_config() {
        let config = QueueConfig::plan_generation();
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 3);
        assert!(matches!(policy.backoff, BackoffStrategy::Exponential { .. }));
    }
}
