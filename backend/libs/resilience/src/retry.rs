/// Bounded retry with exponential backoff and a retry predicate
use crate::metrics::{self, RetryOutcome};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Plain-data retry settings, used by presets and configuration files
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of invocations allowed (first call included)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

/// Exponential backoff schedule: `min(base * 2^(attempt-1), max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay that precedes retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let bounded = base_ms.saturating_mul(1_u64 << shift).min(max_ms);

        if self.jitter {
            let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
            Duration::from_millis((bounded as f64 * factor) as u64)
        } else {
            Duration::from_millis(bounded)
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type AttemptHook<E> = Arc<dyn Fn(u32, &E) + Send + Sync>;

/// Retry policy: attempt budget, backoff, which errors are retryable,
/// and a hook invoked before each retry.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    backoff: Backoff,
    is_retryable: RetryPredicate<E>,
    on_attempt: Option<AttemptHook<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            is_retryable: self.is_retryable.clone(),
            on_attempt: self.on_attempt.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("has_on_attempt", &self.on_attempt.is_some())
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    /// Every error is retryable until told otherwise via [`RetryPolicy::retry_if`].
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::new(base_delay, Duration::from_secs(30)),
            is_retryable: Arc::new(|_| true),
            on_attempt: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay)
            .with_max_delay(config.max_delay)
            .with_jitter(config.jitter)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.backoff.max = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(predicate);
        self
    }

    pub fn on_attempt<H>(mut self, hook: H) -> Self
    where
        H: Fn(u32, &E) + Send + Sync + 'static,
    {
        self.on_attempt = Some(Arc::new(hook));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.is_retryable)(error)
    }
}

/// Runs an operation under a [`RetryPolicy`].
///
/// The operation is invoked at most `max_attempts` times. A failure that the
/// policy does not consider retryable is returned immediately, without delay.
/// When the budget is exhausted the last error is returned unchanged.
#[derive(Debug, Clone)]
pub struct RetryExecutor<E> {
    policy: RetryPolicy<E>,
}

impl<E> RetryExecutor<E>
where
    E: fmt::Display,
{
    pub fn new(policy: RetryPolicy<E>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 1;

        loop {
            match f().await {
                Ok(value) => {
                    metrics::record_retry(RetryOutcome::Succeeded, attempt);
                    return Ok(value);
                }
                Err(error) => {
                    if !self.policy.is_retryable(&error) {
                        debug!(attempt, error = %error, "Non-retryable failure, giving up");
                        metrics::record_retry(RetryOutcome::GaveUp, attempt);
                        return Err(error);
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!(
                            "Max attempts ({}) reached: {}",
                            self.policy.max_attempts, error
                        );
                        metrics::record_retry(RetryOutcome::Exhausted, attempt);
                        return Err(error);
                    }

                    let delay = self.policy.backoff.delay_for_attempt(attempt);
                    warn!(
                        "Retry attempt {}/{}, waiting {:?}: {}",
                        attempt + 1,
                        self.policy.max_attempts,
                        delay,
                        error
                    );

                    tokio::time::sleep(delay).await;

                    if let Some(hook) = &self.policy.on_attempt {
                        hook(attempt, &error);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Shorthand for `RetryExecutor::new(policy.clone()).execute(f)`.
pub async fn execute<F, Fut, T, E>(policy: &RetryPolicy<E>, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    RetryExecutor::new(policy.clone()).execute(f).await
}
