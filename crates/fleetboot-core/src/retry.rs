//! Retry-with-backoff primitive
//!
//! Connection attempts, command re-execution, readiness polling and health
//! probes all go through [`retry_with_backoff`].

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::trace;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// `initial * factor^(n-1)` after the n-th failed attempt, capped at `max`
    Exponential {
        initial: Duration,
        factor: u32,
        max: Duration,
    },
}

impl Backoff {
    /// Delay after the given failed attempt (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                factor,
                max,
            } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
                initial.checked_mul(multiplier).unwrap_or(max).min(max)
            }
        }
    }
}

/// How often and how long to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` means bounded only by `deadline`
    pub max_attempts: Option<u32>,
    /// Delay schedule
    pub backoff: Backoff,
    /// Give up once this much time has passed since the first attempt
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// `attempts` tries with a fixed delay between them
    #[must_use]
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(attempts),
            backoff: Backoff::Fixed(delay),
            deadline: None,
        }
    }

    /// `attempts` tries with doubling delay, starting at `initial`, capped at `max`
    #[must_use]
    pub fn exponential(attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: Some(attempts),
            backoff: Backoff::Exponential {
                initial,
                factor: 2,
                max,
            },
            deadline: None,
        }
    }

    /// Poll every `interval` until `deadline`, with no attempt limit
    #[must_use]
    pub fn polling(interval: Duration, deadline: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(interval),
            deadline: Some(deadline),
        }
    }
}

/// What one attempt produced
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished successfully
    Done(T),
    /// Failed in a way worth trying again
    Retry(E),
    /// Failed for good; stop immediately
    Abort(E),
}

/// A successful value and how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why retrying stopped without success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Attempt limit or deadline reached; `last` is the final retryable failure
    Exhausted { attempts: u32, last: E },
    /// An attempt reported a non-retryable failure
    Aborted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The last failure
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Run `op` until it is done, aborts, or the policy runs out
///
/// `op` receives the 1-based attempt number. With a deadline, the last sleep
/// is shortened so that one final attempt happens at the deadline.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let last = match op(attempt).await {
            Attempt::Done(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Attempt::Abort(error) => {
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error,
                });
            }
            Attempt::Retry(last) => last,
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last,
            });
        }

        let mut delay = policy.backoff.delay_for(attempt);
        if let Some(deadline) = policy.deadline {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }
            delay = delay.min(deadline - elapsed);
        }

        trace!(attempt, delay = ?delay, "retrying");
        sleep(delay).await;
    }
}
