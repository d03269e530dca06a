
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::ProviderError;

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    #[inline]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// A successful result and how many attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> Retried<T> {
    /// Attempts beyond the first one
    #[inline]
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    /// The last error seen, either non-transient or after the attempts ran out
    Failed { attempts: u32, error: ProviderError },
    Cancelled { attempts: u32 },
}

/// Run `call` until it succeeds, fails permanently, runs out of attempts or is
/// cancelled. Backoff sleeps wake up early on cancellation.
#[inline]
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut call: F,
) -> Result<Retried<T>, RetryFailure>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryFailure::Cancelled {
                attempts: attempt - 1,
            });
        }

        debug!("{} attempt {}/{}", operation, attempt, max_attempts);

        match call() {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) if !error.is_transient() => {
                warn!("{} failed with non-retryable error: {}", operation, error);
                return Err(RetryFailure::Failed {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                warn!(
                    "{} failed: {}, attempt {}/{}",
                    operation, error, attempt, max_attempts
                );

                if attempt == max_attempts {
                    error!("All {} attempts failed for {}", max_attempts, operation);
                    return Err(RetryFailure::Failed {
                        attempts: attempt,
                        error,
                    });
                }

                let delay = policy.delay_after(attempt);
                debug!("Waiting {:?} before retrying {}", delay, operation);
                if !sleep_unless_cancelled(delay, cancel) {
                    return Err(RetryFailure::Cancelled { attempts: attempt });
                }
            }
        }
    }

    unreachable!("retry loop always returns from its last attempt")
}

/// Returns false if the token fired before the delay elapsed
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(CANCEL_POLL_INTERVAL));
    }
}
