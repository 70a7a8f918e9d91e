//! Exponential backoff with jitter for downstream calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::bridge::error::BridgeError;

/// Jitter band applied to each backoff delay, as a fraction of the
/// exponential delay (uniform in ±25%).
pub const JITTER_FRACTION: f64 = 0.25;

/// Backoff schedule for retryable downstream failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay for attempt 0, doubles (by `multiplier`) each attempt
    pub base_delay: Duration,
    /// Cap on the exponential delay, applied before jitter
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows attempt `attempt` (zero-based),
    /// with jitter sampled uniformly from ±`JITTER_FRACTION`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic variant: `jitter` is the signed fraction to apply.
    /// `min(base · multiplierⁿ, max_delay) · (1 + jitter)`, clipped at zero.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }

    /// Total attempts the retry loop will make (initial try plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Terminal outcome of an exhausted or aborted retry loop.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: BridgeError,
    /// Attempts actually made, including the first
    pub attempts: u32,
}

/// Drive `attempt_fn` until it succeeds, returns a non-retryable error, or
/// the policy is exhausted. `on_retry` runs before each backoff sleep so the
/// caller can drop a faulted connection. The backoff sleep races the
/// shutdown token; cancellation aborts the loop immediately.
pub async fn run_with_retry<T, F, Fut, C>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    mut attempt_fn: F,
    mut on_retry: C,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
    C: FnMut(&BridgeError),
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let attempts = attempt + 1;
                if !error.is_retryable() || attempts >= policy.max_attempts() {
                    return Err(RetryFailure { error, attempts });
                }

                on_retry(&error);
                let delay = policy.delay_for_attempt(attempt);
                log::debug!(
                    "attempt {attempts}/{} failed: {error}. Retrying in {delay:?}",
                    policy.max_attempts()
                );

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = shutdown.cancelled() => {
                        log::info!("retry loop cancelled during backoff");
                        return Err(RetryFailure { error, attempts });
                    }
                }
                attempt += 1;
            }
        }
    }
}
