//! Retry - Bounded exponential backoff for transient remote failures

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::remote::{RemoteError, RemoteResult};

/// Backoff schedule for retrying an initiating remote call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the multiplicative jitter applied to each delay
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16) as i32;
        let delay = self.base_delay.mul_f64(2f64.powi(exponent));
        with_jitter(delay.min(self.max_delay), self.jitter_fraction)
    }
}

/// Spread a delay upward by a random fraction, so many concurrent
/// reconciliations do not hit the remote API in lockstep.
pub fn with_jitter(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    let spread = rand::thread_rng().gen_range(0.0..fraction);
    delay.mul_f64(1.0 + spread)
}

/// Why a retried call gave up
#[derive(Debug, Error)]
pub enum RetryError {
    /// The last failure, transient or not; transient means attempts ran out
    #[error(transparent)]
    Remote(RemoteError),

    #[error("retry cancelled")]
    Cancelled,
}

/// Run a remote call, retrying transient failures on the policy's schedule.
///
/// Non-transient failures return immediately; the caller decides what they
/// mean for the operation at hand.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "transient remote failure (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    policy.max_attempts,
                    delay,
                    err
                );
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(RetryError::Remote(err)),
        }
    }
}
