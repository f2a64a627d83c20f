//! Retry budget and delay schedule for asset fetches.

use std::time::Duration;

use sr_core::config::{AssetsConfig, BackoffKind};

/// Upper bound for exponential delays.
const MAX_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(15),
            backoff: BackoffKind::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AssetsConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            delay: Duration::from_secs(config.retry_delay_secs),
            backoff: config.backoff,
        }
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(MAX_DELAY)
            }
        }
    }
}
