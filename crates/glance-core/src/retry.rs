//! Retry-until-success-or-exhausted, shared by the source adapters.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Same delay after every attempt.
    Fixed(Duration),
    /// `base * attempt` after attempt 1, 2, ...
    Linear(Duration),
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(d) => *d,
            Self::Linear(base) => *base * attempt,
        }
    }
}

/// An explicit retry policy value object.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Run `op` until it succeeds, `max_attempts` is exhausted, or `cancel`
    /// fires. The closure receives the 1-based attempt number. Cancellation
    /// between attempts returns the last error, or `cancelled()` if no
    /// attempt ran.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        cancelled: impl Fn() -> E,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts.max(1) {
            if cancel.is_cancelled() {
                return Err(last_err.unwrap_or_else(cancelled));
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => last_err = Some(e),
            }
            if attempt < self.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.backoff.delay(attempt)) => {}
                }
            }
        }
        Err(last_err.unwrap_or_else(cancelled))
    }
}
