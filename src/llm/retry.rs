use crate::config::LlmConfig;
use crate::error::LlmError;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff shared by every model call.
///
/// A rate-limit answer carrying a server-requested wait uses that wait
/// instead of the computed delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// A single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay after the zero-based `attempt` failed
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16) as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        delay + self.random_jitter()
    }

    fn random_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::random_range(0..=max))
    }

    fn delay_for(&self, err: &LlmError, attempt: usize) -> Duration {
        match err {
            LlmError::RateLimited {
                retry_after: Some(wait),
            } => *wait,
            _ => self.backoff_delay(attempt),
        }
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the attempts are exhausted; the last error is returned
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempt + 1 >= attempts => {
                    ::log::warn!(
                        "{} failed after {} attempt(s): {}",
                        label,
                        attempt + 1,
                        err
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(&err, attempt);
                    ::log::info!(
                        "{} attempt {}/{} failed ({}), retrying in {} ms",
                        label,
                        attempt + 1,
                        attempts,
                        err,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
