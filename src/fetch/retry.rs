//! Per-fragment retry policy

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Settings;
use crate::storage::StorageError;

/// Bounded exponential backoff for single-fragment fetches
///
/// `max_retries` is a hard ceiling: a fragment is attempted at most
/// `max_retries + 1` times. Every error is retried, a missing fragment or a
/// rejected credential included, except cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Spread delays by up to half their length in either direction
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.retries,
            initial_delay: settings.retry_initial_delay,
            max_delay: settings.retry_max_delay,
            jitter: true,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2f64.powi(attempt.saturating_sub(1).min(30) as i32);
        let delay = Duration::from_secs_f64(self.initial_delay.as_secs_f64() * multiplier);
        delay.min(self.max_delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let range = delay.as_secs_f64() / 2.0;
        let jitter = rand::rng().random_range(-range / 2.0..=range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }

    /// Run `op` until it succeeds, the retries run out, or `token` is cancelled
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 0;
        loop {
            if token.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StorageError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => err,
            };
            if attempt >= self.max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = self.apply_jitter(self.delay(attempt));
            debug!(
                "Retrying fetch (attempt {}/{}) after {:?}: {}",
                attempt, self.max_retries, delay, err
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
