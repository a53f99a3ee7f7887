//! Whole-run retry with linear backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::cancel::CancelSignal;
use crate::error::{HarvestError, HarvestResult};

/// Wraps one complete harvest per attempt.
///
/// Retryable failures re-run the whole operation up to `max_attempts`,
/// sleeping `base_delay × attempt` before each retry (linear backoff; the
/// attempt count is capped at 3 in production so the delays stay in the
/// seconds range). Cancellation and authentication failures are re-raised
/// immediately, and the backoff sleep itself observes cancellation.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Run `operation` until it succeeds, fails fatally, or the attempt
    /// budget is spent. Exhaustion wraps the last error with the attempt
    /// count.
    pub async fn run<T, F, Fut>(&self, cancel: &CancelSignal, mut operation: F) -> HarvestResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HarvestResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(HarvestError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.base_delay * attempt;
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "harvest attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(HarvestError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}
