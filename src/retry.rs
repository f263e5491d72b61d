//! Bounded retry for store calls and upstream requests.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::RegimenError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(3000),
            cap: Duration::from_millis(15000),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl RetryPolicy {
    /// `REGIMEN_RETRY_ATTEMPTS`, `REGIMEN_RETRY_BASE_MS`, `REGIMEN_RETRY_CAP_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_attempts: env_u64("REGIMEN_RETRY_ATTEMPTS").map_or(d.max_attempts, |n| n.max(1) as u32),
            base: env_u64("REGIMEN_RETRY_BASE_MS").map_or(d.base, Duration::from_millis),
            cap: env_u64("REGIMEN_RETRY_CAP_MS").map_or(d.cap, Duration::from_millis),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base: Duration::ZERO, cap: Duration::ZERO }
    }

    /// Full-jitter delay before attempt `attempt + 1` (attempt counts from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        let ceiling = exp.min(self.cap).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let half = ceiling / 2;
        Duration::from_millis(half + rand::rng().random_range(0..=ceiling - half))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned as is.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RegimenError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegimenError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(op = what, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Run a blocking store operation on the blocking pool with retries.
pub async fn with_retry<T, F>(policy: &RetryPolicy, what: &str, f: F) -> Result<T, RegimenError>
where
    F: Fn() -> Result<T, RegimenError> + Clone + Send + 'static,
    T: Send + 'static,
{
    policy
        .run(what, || {
            let f = f.clone();
            async move {
                tokio::task::spawn_blocking(f)
                    .await
                    .map_err(|e| RegimenError::Internal(e.to_string()))?
            }
        })
        .await
}
