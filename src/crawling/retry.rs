//! Bounded retries with exponential backoff for transient fetch failures

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infrastructure::config::RetryConfig;
use crate::infrastructure::http_client::FetchError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_ms: config.jitter_ms,
        }
    }

    /// A policy that gives up after the first failure.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }

    /// Delay before the attempt that follows `attempt` (1-based), capped at `max_delay_ms`.
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let exponential = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if exponential.is_finite() {
            (exponential as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        let jitter = if self.jitter_ms > 0 {
            fastrand::u64(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Backoff sleeps race the cancellation token.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        cancellation_token: &CancellationToken,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, FetchError>> + Send,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(&error, attempt) => {
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        "⚠️ {} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, self.max_attempts, error, delay
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {},
                        () = cancellation_token.cancelled() => return Err(FetchError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(error) => {
                    if attempt > 1 {
                        debug!("{} gave up after {} attempts", what, attempt);
                    }
                    return Err(error);
                }
            }
        }
    }
}
