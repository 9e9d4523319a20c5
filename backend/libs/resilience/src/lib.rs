/// Resilience primitives shared by the live-stream client runtime
///
/// This library provides:
/// - **Retry**: bounded attempts with exponential backoff and a retry predicate
/// - **Circuit Breaker**: fails fast while a dependency keeps failing, with half-open recovery
/// - **Timeout**: enforces time limits on suspending operations
/// - **Preset Configurations**: pre-tuned settings for sockets, HTTP fallback, media loads and telemetry
///
/// # Example: retrying a fallback fetch
///
/// ```rust,no_run
/// use resilience::{RetryExecutor, RetryPolicy};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let policy = RetryPolicy::new(3, Duration::from_millis(250))
///         .retry_if(|e: &String| e.contains("timeout"));
///
///     let result = RetryExecutor::new(policy)
///         .execute(|| async {
///             // Your HTTP call here
///             Ok::<_, String>(())
///         })
///         .await;
/// }
/// ```
///
/// # Example: guarding a dependency with a circuit breaker
///
/// ```rust,no_run
/// use resilience::{presets, CircuitBreaker};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::http_fallback_config();
///     let breaker = CircuitBreaker::new("chat-history", config.circuit_breaker);
///
///     let result = breaker.call(|| async { Ok::<_, String>(()) }).await;
/// }
/// ```

pub mod circuit_breaker;
pub mod metrics;
pub mod presets;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use presets::{
    http_fallback_config, media_load_config, message_post_config, metrics_egress_config,
    realtime_socket_config, ServiceConfig,
};
pub use retry::{Backoff, RetryConfig, RetryExecutor, RetryPolicy};
pub use timeout::{with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};
