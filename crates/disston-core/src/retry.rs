//! Bounded exponential backoff for idempotent reads.
//!
//! Only statuses in [`TRANSIENT_STATUSES`](crate::api::error::TRANSIENT_STATUSES)
//! are retried. Mutations never go through here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ApiError;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 400;
const DEFAULT_MAX_JITTER_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Deterministic part of the delay before attempt `attempt` (0-indexed):
    /// `base_delay * 2^attempt`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay before attempt `attempt`, jittered into
    /// `[base_backoff, base_backoff + max_jitter)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_backoff(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_micros() as u64;
        if max == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(rand::thread_rng().gen_range(0..max))
        }
    }
}

/// Run `operation` until it succeeds, fails fatally, or `policy.attempts`
/// tries are used up; the last error is returned in the latter cases.
///
/// Cancellation is checked before every attempt and interrupts backoff sleeps.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ApiError::cancelled());
        }

        let err = match operation(cancel.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt += 1;
        if err.is_cancelled() || !err.is_transient() {
            debug!(status = err.status(), attempt, "Fatal error, not retrying");
            return Err(err);
        }
        if attempt >= attempts {
            warn!(status = err.status(), attempts, "Retries exhausted");
            return Err(err);
        }

        let delay = policy.backoff_delay(attempt);
        warn!(
            status = err.status(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, backing off"
        );

        tokio::select! {
            () = cancel.cancelled() => return Err(ApiError::cancelled()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}
