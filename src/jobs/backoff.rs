/// Delay before a deferred job is re-delivered
use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// `attempt^exponent + base + jitter * (attempt + 1)` seconds, with jitter
/// drawn uniformly from `[0, jitter_sec)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub exponent: u32,
    pub base_delay_sec: u64,
    pub jitter_sec: u64,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            exponent: config.exponent,
            base_delay_sec: config.base_delay_sec,
            jitter_sec: config.jitter_sec,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_sec == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_sec)
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Smallest delay `delay_for(attempt)` can return
    pub fn min_delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, 0)
    }

    /// Largest delay `delay_for(attempt)` can return
    pub fn max_delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, self.jitter_sec.saturating_sub(1))
    }

    fn delay_with_jitter(&self, attempt: u32, jitter: u64) -> Duration {
        let attempt = u64::from(attempt);
        let secs = attempt
            .saturating_pow(self.exponent)
            .saturating_add(self.base_delay_sec)
            .saturating_add(jitter.saturating_mul(attempt + 1));
        Duration::from_secs(secs)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
