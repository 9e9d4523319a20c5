use crate::error::LiveError;
use dotenvy::dotenv;
use reqwest::Url;
use resilience::{CircuitBreakerConfig, RetryConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Connection lifecycle settings for one logical channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub socket_url: String,
    /// First reconnect delay; doubles per attempt
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Guards the HTTP fallback so a dead API is not hammered
    pub poll_breaker: CircuitBreakerConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        let socket = resilience::realtime_socket_config();
        let reconnect = socket.retry.unwrap_or_default();
        Self {
            socket_url: "ws://127.0.0.1:8080/ws".to_string(),
            reconnect_base: reconnect.base_delay,
            reconnect_cap: reconnect.max_delay,
            max_reconnect_attempts: reconnect.max_attempts,
            poll_interval: Duration::from_secs(5),
            connect_timeout: socket.timeout.duration,
            poll_breaker: resilience::http_fallback_config().circuit_breaker,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub buffer_capacity: usize,
    pub max_message_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 200,
            max_message_chars: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub max_network_recoveries: u32,
    pub network_recovery_wait: Duration,
    pub max_media_recoveries: u32,
    pub media_recovery_wait: Duration,
    pub rebuild_delay: Duration,
    pub manifest_preload_timeout: Duration,
    pub live_edge_margin_secs: f64,
    pub live_edge_sample_interval: Duration,
    /// Source load retry for transport failures during bring-up
    pub load_retry: RetryConfig,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_network_recoveries: 3,
            network_recovery_wait: Duration::from_secs(10),
            max_media_recoveries: 2,
            media_recovery_wait: Duration::from_secs(5),
            rebuild_delay: Duration::from_secs(1),
            manifest_preload_timeout: Duration::from_millis(500),
            live_edge_margin_secs: 0.5,
            live_edge_sample_interval: Duration::from_secs(1),
            load_retry: resilience::media_load_config().retry.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Egress endpoint; telemetry is disabled when unset
    pub endpoint: Option<String>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            batch_size: 20,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 512,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub api_base_url: String,
    pub chat_channel: ChannelConfig,
    pub control_channel: ChannelConfig,
    pub chat: ChatConfig,
    pub playback: PlaybackConfig,
    pub metrics: MetricsConfig,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn validate_url(key: &str, value: String) -> Result<String, LiveError> {
    Url::parse(&value).map_err(|e| LiveError::Config(format!("{key} is not a valid URL: {e}")))?;
    Ok(value)
}

impl LiveConfig {
    /// Defaults everywhere, both rooms on the default socket endpoint
    pub fn with_api_base(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            chat_channel: ChannelConfig::default(),
            control_channel: ChannelConfig::default(),
            chat: ChatConfig::default(),
            playback: PlaybackConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, LiveError> {
        dotenv().ok();

        let api_base_url = env::var("LIVE_API_BASE_URL")
            .map_err(|_| LiveError::Config("LIVE_API_BASE_URL missing".into()))?;
        let api_base_url = validate_url("LIVE_API_BASE_URL", api_base_url)?;

        let defaults = ChannelConfig::default();
        let socket_url = validate_url(
            "LIVE_SOCKET_URL",
            env::var("LIVE_SOCKET_URL").unwrap_or(defaults.socket_url),
        )?;

        let channel = ChannelConfig {
            socket_url: socket_url.clone(),
            reconnect_base: env_millis("LIVE_RECONNECT_BASE_MS", defaults.reconnect_base),
            reconnect_cap: env_millis("LIVE_RECONNECT_CAP_MS", defaults.reconnect_cap),
            max_reconnect_attempts: env_parse(
                "LIVE_RECONNECT_MAX_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            poll_interval: env_millis("LIVE_POLL_INTERVAL_MS", defaults.poll_interval),
            connect_timeout: env_millis("LIVE_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            poll_breaker: CircuitBreakerConfig {
                failure_threshold: env_parse(
                    "LIVE_POLL_BREAKER_THRESHOLD",
                    defaults.poll_breaker.failure_threshold,
                ),
                recovery_timeout: env_millis(
                    "LIVE_POLL_BREAKER_RECOVERY_MS",
                    defaults.poll_breaker.recovery_timeout,
                ),
            },
        };

        // Chat and control may live on separate socket endpoints
        let chat_channel = match env::var("LIVE_CHAT_SOCKET_URL") {
            Ok(url) => ChannelConfig {
                socket_url: validate_url("LIVE_CHAT_SOCKET_URL", url)?,
                ..channel.clone()
            },
            Err(_) => channel.clone(),
        };
        let control_channel = match env::var("LIVE_CONTROL_SOCKET_URL") {
            Ok(url) => ChannelConfig {
                socket_url: validate_url("LIVE_CONTROL_SOCKET_URL", url)?,
                ..channel.clone()
            },
            Err(_) => channel,
        };

        let chat_defaults = ChatConfig::default();
        let chat = ChatConfig {
            buffer_capacity: env_parse("LIVE_CHAT_BUFFER", chat_defaults.buffer_capacity).max(1),
            max_message_chars: env_parse("LIVE_CHAT_MAX_CHARS", chat_defaults.max_message_chars),
        };

        let playback_defaults = PlaybackConfig::default();
        let playback = PlaybackConfig {
            max_network_recoveries: env_parse(
                "LIVE_PLAYBACK_NETWORK_RECOVERIES",
                playback_defaults.max_network_recoveries,
            ),
            network_recovery_wait: env_millis(
                "LIVE_PLAYBACK_NETWORK_WAIT_MS",
                playback_defaults.network_recovery_wait,
            ),
            max_media_recoveries: env_parse(
                "LIVE_PLAYBACK_MEDIA_RECOVERIES",
                playback_defaults.max_media_recoveries,
            ),
            media_recovery_wait: env_millis(
                "LIVE_PLAYBACK_MEDIA_WAIT_MS",
                playback_defaults.media_recovery_wait,
            ),
            rebuild_delay: env_millis("LIVE_PLAYBACK_REBUILD_DELAY_MS", playback_defaults.rebuild_delay),
            manifest_preload_timeout: env_millis(
                "LIVE_PLAYBACK_PRELOAD_TIMEOUT_MS",
                playback_defaults.manifest_preload_timeout,
            ),
            live_edge_margin_secs: env_parse(
                "LIVE_PLAYBACK_EDGE_MARGIN_SECS",
                playback_defaults.live_edge_margin_secs,
            ),
            ..playback_defaults
        };

        let metrics_defaults = MetricsConfig::default();
        let metrics = MetricsConfig {
            endpoint: match env::var("LIVE_METRICS_URL") {
                Ok(url) => Some(validate_url("LIVE_METRICS_URL", url)?),
                Err(_) => None,
            },
            batch_size: env_parse("LIVE_METRICS_BATCH_SIZE", metrics_defaults.batch_size).max(1),
            flush_interval: env_millis("LIVE_METRICS_FLUSH_MS", metrics_defaults.flush_interval),
            queue_capacity: metrics_defaults.queue_capacity,
        };

        Ok(Self {
            api_base_url,
            chat_channel,
            control_channel,
            chat,
            playback,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.reconnect_base, Duration::from_secs(1));
        assert_eq!(config.reconnect_cap, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, 10);

        let socket = resilience::realtime_socket_config();
        assert_eq!(config.connect_timeout, socket.timeout.duration);
        let fallback = resilience::http_fallback_config().circuit_breaker;
        assert_eq!(config.poll_breaker.failure_threshold, fallback.failure_threshold);
        assert_eq!(config.poll_breaker.recovery_timeout, fallback.recovery_timeout);
    }

    #[test]
    fn test_playback_defaults() {
        let config = PlaybackConfig::default();
        assert_eq!(config.max_network_recoveries, 3);
        assert_eq!(config.max_media_recoveries, 2);
        assert_eq!(config.network_recovery_wait, Duration::from_secs(10));
        assert_eq!(config.media_recovery_wait, Duration::from_secs(5));
        assert_eq!(config.manifest_preload_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        let err = validate_url("LIVE_SOCKET_URL", "not a url".into()).unwrap_err();
        assert!(matches!(err, LiveError::Config(_)));
        assert!(validate_url("LIVE_SOCKET_URL", "wss://live.example/ws".into()).is_ok());
    }
}
