//! Exponential backoff shared by the gate, the stage runner and the stages.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Delay schedule: `initial`, doubling after every failure, capped at `max`.
/// `attempts` bounds the total number of tries; `None` retries until success
/// or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub attempts: Option<u32>,
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempts: None,
        }
    }

    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32
            .checked_shl(failures.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    fn exhausted(&self, failures: u32) -> bool {
        self.attempts.is_some_and(|max| failures >= max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The last error, either not retryable or the attempts ran out.
    #[error("{0}")]
    Failed(E),
    /// Shutdown arrived while waiting to retry.
    #[error("Cancelled by shutdown")]
    Cancelled,
}

/// Runs `op` until it succeeds, fails with an error `retryable` rejects, or
/// the backoff runs out of attempts.
///
/// An attempt in progress is never interrupted. Only the wait between
/// attempts is cut short by `shutdown`.
pub async fn retry<T, E, F, Fut>(
    operation: &'static str,
    backoff: &Backoff,
    shutdown: Option<&CancellationToken>,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failures = 0u32;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        failures += 1;
        if !retryable(&error) || backoff.exhausted(failures) {
            return Err(RetryError::Failed(error));
        }

        let delay = backoff.delay(failures);
        warn!(
            operation,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );
        match shutdown {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}
