/// Integration tests for resilience library
use resilience::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState},
    presets,
    retry::{RetryExecutor, RetryPolicy},
    timeout::{with_timeout, with_timeout_result},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ==================== Circuit Breaker Tests ====================

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_full_lifecycle() {
    let cb = CircuitBreaker::new(
        "lifecycle",
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(5),
        },
    );
    let invocations = Arc::new(AtomicU32::new(0));

    // Phase 1: Closed -> Open (2 failures)
    for _ in 0..2 {
        let counter = invocations.clone();
        let _ = cb
            .call(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("error")
            })
            .await;
    }
    assert_eq!(cb.state(), CircuitState::Open);

    // Phase 2: the third call fails without reaching the dependency
    let counter = invocations.clone();
    let rejected = cb
        .call(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;
    assert!(matches!(rejected, Err(CircuitBreakerError::Open(_))));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    // Phase 3: after the recovery timeout the next call is attempted and closes the circuit
    tokio::time::sleep(Duration::from_secs(5)).await;
    let counter = invocations.clone();
    let result = cb
        .call(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>("recovered")
        })
        .await;
    assert_eq!(result.ok(), Some("recovered"));
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.consecutive_failures(), 0);

    // A single failure afterwards must not reopen: the counter was fully reset
    let _ = cb.call(|| async { Err::<(), _>("blip") }).await;
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_rejects_until_timeout() {
    let cb = CircuitBreaker::new(
        "slow-recovery",
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(10),
        },
    );

    let _ = cb.call(|| async { Err::<(), _>("error") }).await;

    tokio::time::sleep(Duration::from_secs(9)).await;
    let result = cb.call(|| async { Ok::<_, String>(()) }).await;
    assert!(result.is_err());
    assert_eq!(cb.state(), CircuitState::Open);
}

// ==================== Timeout Tests ====================

#[tokio::test(start_paused = true)]
async fn test_timeout_success() {
    let result = with_timeout(Duration::from_secs(1), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        42
    })
    .await;

    assert_eq!(result.ok(), Some(42));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_result_operation_failed() {
    let result = with_timeout_result(Duration::from_secs(1), async {
        Err::<i32, _>("operation failed")
    })
    .await;

    assert!(result.is_err());
}

// ==================== Retry Tests ====================

#[tokio::test(start_paused = true)]
async fn test_retry_success_after_transient_failures() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let executor = RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(10)));

    let result = executor
        .execute(move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("transient error".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

    assert_eq!(result, Ok(42));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_surfaces_final_error_after_max_attempts() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let executor = RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(50)));

    let result = executor
        .execute(move || {
            let n = counter_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err::<i32, _>(format!("attempt {n} failed")) }
        })
        .await;

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(result, Err("attempt 3 failed".to_string()));
}

// ==================== Preset Configuration Tests ====================

#[test]
fn test_http_fallback_config_values() {
    let config = presets::http_fallback_config();
    assert_eq!(config.timeout.duration, Duration::from_secs(8));
    assert_eq!(config.retry.expect("idempotent reads retry").max_attempts, 2);
}

#[test]
fn test_media_load_config_values() {
    let config = presets::media_load_config();
    assert!(config.retry.is_some());
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
}

// ==================== Combined Scenario Tests ====================

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_with_timeout() {
    let cb = CircuitBreaker::new(
        "timeouts",
        CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        },
    );

    for _ in 0..2 {
        let _ = cb
            .call(|| async {
                with_timeout(Duration::from_millis(10), async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                })
                .await
            })
            .await;
    }

    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_retry_through_circuit_breaker_stops_on_open() {
    let cb = CircuitBreaker::new(
        "combined",
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        },
    );
    let counter = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(5, Duration::from_millis(10))
        .retry_if(|e: &CircuitBreakerError<String>| !e.is_open());

    let result = RetryExecutor::new(policy)
        .execute(|| {
            let cb = cb.clone();
            let counter = counter.clone();
            async move {
                cb.call(|| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("down".to_string())
                })
                .await
            }
        })
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}
