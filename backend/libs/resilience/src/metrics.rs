//! Prometheus series for the resilience primitives.
//!
//! Every series is labelled by the dependency it guards (the breaker name,
//! e.g. `chat-socket` or `stats-poll`) so a dashboard can tell a flapping chat
//! socket from a slow stats endpoint. Without the `metrics` feature the
//! recorders compile to nothing.
use crate::circuit_breaker::CircuitState;
use std::time::Duration;

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

/// How a guarded call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Failed fast, the dependency was never touched
    Rejected,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Rejected => "rejected",
        }
    }
}

/// How a retried operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded,
    /// The error was not worth another attempt
    GaveUp,
    Exhausted,
}

impl RetryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Succeeded => "succeeded",
            RetryOutcome::GaveUp => "gave_up",
            RetryOutcome::Exhausted => "exhausted",
        }
    }
}

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    Elapsed,
}

impl WaitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitOutcome::Completed => "completed",
            WaitOutcome::Elapsed => "elapsed",
        }
    }
}

#[cfg(feature = "metrics")]
static DEPENDENCY_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "live_dependency_calls_total",
        "Calls through a circuit breaker, by circuit state and outcome",
        &["dependency", "circuit", "outcome"]
    )
    .expect("Failed to register dependency calls metric")
});

#[cfg(feature = "metrics")]
static CIRCUIT_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "live_circuit_transitions_total",
        "Circuit state changes per dependency",
        &["dependency", "from", "to"]
    )
    .expect("Failed to register circuit transitions metric")
});

// Outages of a realtime socket run from seconds to a few minutes
#[cfg(feature = "metrics")]
static CIRCUIT_OPEN_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "live_circuit_open_seconds",
        "Time from a circuit opening until it closed again",
        &["dependency"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    )
    .expect("Failed to register circuit open time metric")
});

#[cfg(feature = "metrics")]
static BOUNDED_WAITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "live_bounded_waits_total",
        "Waits run under a deadline, by outcome",
        &["outcome"]
    )
    .expect("Failed to register bounded waits metric")
});

#[cfg(feature = "metrics")]
static RETRY_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "live_retry_attempts",
        "Attempts spent by a retried operation",
        &["outcome"],
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0]
    )
    .expect("Failed to register retry attempts metric")
});

pub fn record_call(dependency: &str, circuit: CircuitState, outcome: CallOutcome) {
    #[cfg(feature = "metrics")]
    DEPENDENCY_CALLS
        .with_label_values(&[dependency, circuit.as_str(), outcome.as_str()])
        .inc();
    #[cfg(not(feature = "metrics"))]
    let _ = (dependency, circuit, outcome);
}

/// Count a state change. `open_for` is set when the circuit closes after an
/// outage and feeds the open-time histogram.
pub fn record_transition(
    dependency: &str,
    from: CircuitState,
    to: CircuitState,
    open_for: Option<Duration>,
) {
    #[cfg(feature = "metrics")]
    {
        CIRCUIT_TRANSITIONS
            .with_label_values(&[dependency, from.as_str(), to.as_str()])
            .inc();
        if let Some(open_for) = open_for {
            CIRCUIT_OPEN_SECONDS
                .with_label_values(&[dependency])
                .observe(open_for.as_secs_f64());
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (dependency, from, to, open_for);
}

pub fn record_wait(outcome: WaitOutcome) {
    #[cfg(feature = "metrics")]
    BOUNDED_WAITS.with_label_values(&[outcome.as_str()]).inc();
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

pub fn record_retry(outcome: RetryOutcome, attempts: u32) {
    #[cfg(feature = "metrics")]
    RETRY_ATTEMPTS
        .with_label_values(&[outcome.as_str()])
        .observe(f64::from(attempts));
    #[cfg(not(feature = "metrics"))]
    let _ = (outcome, attempts);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_match_dashboard_names() {
        assert_eq!(CallOutcome::Rejected.as_str(), "rejected");
        assert_eq!(RetryOutcome::GaveUp.as_str(), "gave_up");
        assert_eq!(WaitOutcome::Elapsed.as_str(), "elapsed");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
    }

    #[test]
    fn test_recorders_accept_every_outcome() {
        record_call("chat-socket", CircuitState::Open, CallOutcome::Rejected);
        record_transition(
            "chat-socket",
            CircuitState::HalfOpen,
            CircuitState::Closed,
            Some(Duration::from_secs(12)),
        );
        record_wait(WaitOutcome::Completed);
        record_retry(RetryOutcome::Exhausted, 3);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_calls_are_counted_per_dependency() {
        let before = DEPENDENCY_CALLS
            .with_label_values(&["stats-poll-test", "closed", "failure"])
            .get();
        record_call("stats-poll-test", CircuitState::Closed, CallOutcome::Failure);
        record_call("stats-poll-test", CircuitState::Closed, CallOutcome::Failure);
        let after = DEPENDENCY_CALLS
            .with_label_values(&["stats-poll-test", "closed", "failure"])
            .get();
        assert_eq!(after - before, 2);

        let other = DEPENDENCY_CALLS
            .with_label_values(&["chat-history-test", "closed", "failure"])
            .get();
        assert_eq!(other, 0);
    }
}
