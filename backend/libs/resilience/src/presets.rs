/// Preset configurations for the live-stream client's dependencies
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a dependency type
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: Option<RetryConfig>,
}

/// Persistent socket (chat / control rooms)
///
/// - Timeout: 10s connect
/// - Reconnect: 1s base, doubling, capped at 30s, 10 attempts
pub fn realtime_socket_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(30),
        },
        retry: Some(RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }),
    }
}

/// HTTP fallback reads (chat history, stream stats)
///
/// - Timeout: 8s
/// - Circuit breaker: 5 failures, 15s cooldown
/// - Retry: 2 attempts (idempotent GETs)
pub fn http_fallback_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(8),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(15),
        },
        retry: Some(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }),
    }
}

/// Direct message POST
///
/// - Timeout: 5s, the viewer is waiting on it
/// - No retry (avoid duplicate chat lines)
pub fn message_post_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(15),
        },
        retry: None,
    }
}

/// Media source load (manifest fetch during bring-up)
///
/// - Retry: 2 attempts, short backoff so join time stays low
pub fn media_load_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(10),
        },
        retry: Some(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(1),
            jitter: false,
        }),
    }
}

/// Telemetry egress
///
/// - Circuit breaker: 3 failures, 60s cooldown (drop batches while open)
/// - No retry (fire-and-forget)
pub fn metrics_egress_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        },
        retry: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_socket_config() {
        let config = realtime_socket_config();
        assert_eq!(config.timeout.duration, Duration::from_secs(10));
        let retry = config.retry.expect("socket reconnects");
        assert_eq!(retry.base_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_message_post_config_never_retries() {
        let config = message_post_config();
        assert!(config.retry.is_none());
        assert!(config.timeout.duration < http_fallback_config().timeout.duration);
    }

    #[test]
    fn test_metrics_egress_config() {
        let config = metrics_egress_config();
        assert!(config.retry.is_none());
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
    }
}
