use crate::config::stack::{BuildPolicy, JitterMode};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Bounded attempt count with a fixed delay between attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    jitter: JitterMode,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter: JitterMode::None,
        }
    }

    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt`, or `None` once the budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        Some(match self.jitter {
            JitterMode::None => self.backoff,
            JitterMode::Full => jitter_between(Duration::ZERO, self.backoff),
        })
    }
}

impl From<&BuildPolicy> for RetryPolicy {
    fn from(policy: &BuildPolicy) -> Self {
        RetryPolicy::new(policy.max_attempts, policy.backoff).with_jitter(policy.jitter)
    }
}

#[async_trait]
pub trait RetryContext {
    type Output: Send;
    type Error: Send;

    async fn attempt(&mut self, attempt: u32) -> Result<Self::Output, Self::Error>;
    async fn report_error(&mut self, error: &Self::Error, attempt: u32, delay: Option<Duration>);
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { error: E, attempts: u32 },
    Cancelled { attempts: u32, last_error: Option<E> },
}

/// Runs attempts until one succeeds, the policy is exhausted, or `shutdown` fires.
/// Both the attempt itself and the backoff wait are interrupted by cancellation.
pub async fn run_retry_loop<C>(
    shutdown: &CancellationToken,
    policy: &RetryPolicy,
    context: &mut C,
) -> RetryOutcome<C::Output, C::Error>
where
    C: RetryContext + Send,
{
    let mut attempts = 0;
    let mut last_error = None;

    loop {
        if shutdown.is_cancelled() {
            return RetryOutcome::Cancelled {
                attempts,
                last_error,
            };
        }

        attempts += 1;
        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                return RetryOutcome::Cancelled { attempts, last_error };
            }
            result = context.attempt(attempts) => result,
        };

        match result {
            Ok(value) => return RetryOutcome::Succeeded { value, attempts },
            Err(err) => {
                let delay = policy.next_delay(attempts);
                context.report_error(&err, attempts, delay).await;
                match delay {
                    None => {
                        return RetryOutcome::Exhausted {
                            error: err,
                            attempts,
                        }
                    }
                    Some(delay) => {
                        last_error = Some(err);
                        if sleep_with_shutdown(delay, shutdown).await {
                            return RetryOutcome::Cancelled {
                                attempts,
                                last_error,
                            };
                        }
                    }
                }
            }
        }
    }
}

/// Sleeps for a duration but aborts early if the shutdown token fires.
/// Returns `true` if shutdown occurred during the wait.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    if duration.is_zero() {
        return shutdown.is_cancelled();
    }
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let min_secs = min.as_secs_f64();
    let span = max.as_secs_f64() - min_secs;
    let sample = rng.gen::<f64>() * span + min_secs;
    Duration::from_secs_f64(sample)
}
