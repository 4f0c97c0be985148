//! One retry policy shared by every stage that talks to the completion service.
//!
//! A stage picks its own attempt budget and backoff (the planner waits
//! `5s × attempt`, topic generation `10s × attempt`) and decides which errors
//! are worth another attempt. Waits and in-flight attempts are abandoned as
//! soon as the job's cancellation token fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay schedule between attempts. `attempt` is the 1-based attempt that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step × attempt`
    Linear(Duration),
    Fixed(Duration),
    Immediate,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Fixed(d) => *d,
            Backoff::Immediate => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Why a retried operation finally gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    Exhausted { attempts: u32, last: E },
    /// The error was classified as not retryable.
    Aborted { attempt: u32, error: E },
    Cancelled,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Aborted { attempt, error } => {
                write!(f, "non-retryable failure on attempt {attempt}: {error}")
            }
            RetryError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RetryPolicy {
    pub const fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear(step),
        }
    }

    /// Catalogue planning: 5 attempts, `5s × attempt`.
    pub const fn planner() -> Self {
        Self::linear(5, Duration::from_secs(5))
    }

    /// Per-topic generation: 5 attempts, `10s × attempt`.
    pub const fn topic() -> Self {
        Self::linear(5, Duration::from_secs(10))
    }

    /// Runs `op` until it succeeds, the budget is spent, `is_retryable` rejects
    /// an error, or `cancel` fires. `op` receives the 1-based attempt number.
    ///
    /// No delay follows the final attempt. Any resource `op` holds (for example a
    /// semaphore permit) is dropped with its future before the backoff sleep.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        is_retryable: R,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = op(attempt) => outcome,
            };
            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !is_retryable(&error) {
                warn!(label, attempt, error = %error, "Non-retryable failure");
                return Err(RetryError::Aborted { attempt, error });
            }
            if attempt >= max_attempts {
                warn!(label, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.backoff.delay(attempt);
            warn!(
                label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, backing off"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
