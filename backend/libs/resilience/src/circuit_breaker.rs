/// Circuit Breaker gating calls to a failing dependency
///
/// State transitions:
/// - Closed → Open: when consecutive failures reach the threshold
/// - Open → HalfOpen: once the recovery timeout has elapsed
/// - HalfOpen → Closed: on the first successful trial call
/// - HalfOpen → Open: on a failed trial call
use crate::metrics::{self, CallOutcome};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Circuit is open, requests fail fast
    Open,
    /// Recovery timeout elapsed, a single trial request is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failure count that opens the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

struct CircuitBreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Releases the half-open trial slot even if the guarded future is dropped.
struct TrialGuard<'a>(&'a Mutex<CircuitBreakerState>);

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().trial_in_flight = false;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker '{0}' is open - failing fast")]
    Open(String),
    #[error(transparent)]
    Failed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Open(_) => None,
            CircuitBreakerError::Failed(e) => Some(e),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            state: Arc::new(Mutex::new(CircuitBreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a future with circuit breaker protection.
    ///
    /// While the circuit is open the closure is never invoked.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.should_reject_call() {
            metrics::record_call(&self.name, CircuitState::Open, CallOutcome::Rejected);
            return Err(CircuitBreakerError::Open(self.name.to_string()));
        }

        let _trial = TrialGuard(&self.state);
        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Failed(e))
            }
        }
    }

    fn should_reject_call(&self) -> bool {
        let mut state = self.state.lock();

        match state.current {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    info!(breaker = %self.name, "Circuit breaker: Open → HalfOpen");
                    metrics::record_transition(
                        &self.name,
                        CircuitState::Open,
                        CircuitState::HalfOpen,
                        None,
                    );
                    state.current = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    false
                } else {
                    true
                }
            }
            CircuitState::HalfOpen => {
                // one trial at a time
                if state.trial_in_flight {
                    true
                } else {
                    state.trial_in_flight = true;
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();

        state.consecutive_failures = 0;
        state.trial_in_flight = false;
        metrics::record_call(&self.name, state.current, CallOutcome::Success);

        if state.current != CircuitState::Closed {
            info!(breaker = %self.name, "Circuit breaker: HalfOpen → Closed");
            metrics::record_transition(
                &self.name,
                state.current,
                CircuitState::Closed,
                state.opened_at.map(|opened_at| opened_at.elapsed()),
            );
            state.current = CircuitState::Closed;
            state.opened_at = None;
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.trial_in_flight = false;
        metrics::record_call(&self.name, state.current, CallOutcome::Failure);

        match state.current {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        "Circuit breaker: Closed → Open (failures: {})",
                        state.consecutive_failures
                    );
                    metrics::record_transition(
                        &self.name,
                        CircuitState::Closed,
                        CircuitState::Open,
                        None,
                    );
                    state.current = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Circuit breaker: HalfOpen → Open (trial failed)");
                metrics::record_transition(
                    &self.name,
                    CircuitState::HalfOpen,
                    CircuitState::Open,
                    None,
                );
                state.current = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// Current circuit state (for monitoring)
    pub fn state(&self) -> CircuitState {
        self.state.lock().current
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Force the circuit closed, e.g. after the dependency was replaced.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.current = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
    }
}
