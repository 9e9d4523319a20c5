use resilience::{CircuitBreakerError, TimeoutError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type LiveResult<T> = Result<T, LiveError>;

/// Classification applied to fatal playback errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorClass {
    Network,
    Media,
    Other,
}

impl MediaErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaErrorClass::Network => "network",
            MediaErrorClass::Media => "media",
            MediaErrorClass::Other => "other",
        }
    }
}

impl fmt::Display for MediaErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LiveError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    #[error("playback error ({class}): {message}")]
    MediaPlayback {
        class: MediaErrorClass,
        message: String,
    },

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("channel closed")]
    Closed,
}

impl LiveError {
    /// Transport-level failures worth another attempt. Validation, decode and
    /// client errors are permanent; an open circuit is transient but must not
    /// be retried immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            LiveError::Transport(_) | LiveError::Timeout(_) => true,
            LiveError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LiveError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            LiveError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_decode() {
            LiveError::Decode(e.to_string())
        } else {
            LiveError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::Decode(e.to_string())
    }
}

impl From<TimeoutError> for LiveError {
    fn from(e: TimeoutError) -> Self {
        match e {
            TimeoutError::Elapsed(duration) => LiveError::Timeout(duration),
            TimeoutError::OperationFailed(message) => LiveError::Transport(message),
        }
    }
}

impl From<CircuitBreakerError<LiveError>> for LiveError {
    fn from(e: CircuitBreakerError<LiveError>) -> Self {
        match e {
            CircuitBreakerError::Open(name) => LiveError::CircuitOpen(name),
            CircuitBreakerError::Failed(inner) => inner,
        }
    }
}
