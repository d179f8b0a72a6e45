use crate::cancel::CancelSignal;
use crate::error::{EmbeddingError, ProviderError, Result};
use std::future::Future;
use std::time::Duration;

/// Capped exponential backoff for transient provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

impl RetryPolicy {
    /// Decide what to do after `attempt` (1-based) failed with `error`.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &ProviderError) -> RetryDecision {
        if !error.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(attempt))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, cancel: &CancelSignal, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => match self.decide(attempt, &err) {
                    RetryDecision::Retry(delay) => {
                        log::warn!(
                            "{label} failed (attempt {attempt}/{}): {err}; retrying in {}ms",
                            self.max_attempts,
                            delay.as_millis()
                        );
                        cancel.sleep(delay).await?;
                    }
                    RetryDecision::GiveUp => return Err(EmbeddingError::Provider(err)),
                },
            }
        }
    }
}
