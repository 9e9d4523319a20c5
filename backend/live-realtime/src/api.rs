//! HTTP fallback API, plus the poll sources that adapt it per channel.

use crate::channel::PollSource;
use crate::chat::Cursor;
use crate::error::{LiveError, LiveResult};
use crate::protocol::{ChatServerFrame, ControlServerFrame, WireHealth, WireMessage};
use async_trait::async_trait;
use reqwest::Url;
use resilience::{RetryExecutor, RetryPolicy, ServiceConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub stream_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub playback_url: Option<String>,
    #[serde(default)]
    pub viewer_count: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub viewer_count: u64,
    #[serde(default)]
    pub bitrate_kbps: f64,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub drop_rate: f64,
    #[serde(default)]
    pub timestamp: i64,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn chat_history(&self, stream_id: &str, since: Option<i64>) -> LiveResult<Vec<WireMessage>>;
    async fn send_message(&self, stream_id: &str, text: &str) -> LiveResult<()>;
}

#[async_trait]
pub trait StreamApi: Send + Sync {
    async fn stream_snapshot(&self, stream_id: &str) -> LiveResult<StreamSnapshot>;
    async fn stream_stats(&self, stream_id: &str) -> LiveResult<StreamStats>;
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    text: &'a str,
}

/// reqwest client for the live API. GETs are retried on transport errors;
/// the message POST never is and runs under its own, shorter timeout.
#[derive(Debug, Clone)]
pub struct LiveApi {
    client: reqwest::Client,
    base_url: Url,
    read_policy: RetryPolicy<LiveError>,
    post_timeout: Duration,
}

impl LiveApi {
    /// Client tuned with the HTTP fallback and message post presets.
    pub fn new(base_url: &str) -> LiveResult<Self> {
        Self::with_configs(
            base_url,
            &resilience::http_fallback_config(),
            &resilience::message_post_config(),
        )
    }

    pub fn with_configs(
        base_url: &str,
        config: &ServiceConfig,
        post: &ServiceConfig,
    ) -> LiveResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| LiveError::Config(format!("invalid API base URL: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout.duration)
            .build()
            .map_err(|e| LiveError::Config(format!("http client: {e}")))?;

        let read_policy = RetryPolicy::from_config(&config.retry.clone().unwrap_or_default())
            .retry_if(LiveError::is_retryable)
            .on_attempt(|attempt, error: &LiveError| {
                debug!(attempt, error = %error, "Retrying fallback read");
            });

        if post.retry.is_some() {
            debug!("Message post preset carries a retry policy, ignoring it");
        }

        Ok(Self {
            client,
            base_url,
            read_policy,
            post_timeout: post.timeout.duration,
        })
    }

    pub fn post_timeout(&self) -> Duration {
        self.post_timeout
    }

    fn endpoint(&self, path: &str) -> LiveResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| LiveError::Config(format!("bad endpoint {path}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> LiveResult<T> {
        RetryExecutor::new(self.read_policy.clone())
            .execute(|| {
                let url = url.clone();
                async move {
                    let response = self.client.get(url).send().await?.error_for_status()?;
                    Ok(response.json::<T>().await?)
                }
            })
            .await
    }
}

#[async_trait]
impl ChatApi for LiveApi {
    async fn chat_history(&self, stream_id: &str, since: Option<i64>) -> LiveResult<Vec<WireMessage>> {
        let mut url = self.endpoint(&format!("streams/{stream_id}/chat"))?;
        if let Some(since) = since {
            url.query_pairs_mut().append_pair("since", &since.to_string());
        }
        self.get_json(url).await
    }

    async fn send_message(&self, stream_id: &str, text: &str) -> LiveResult<()> {
        let url = self.endpoint(&format!("streams/{stream_id}/chat"))?;
        self.client
            .post(url)
            .timeout(self.post_timeout)
            .json(&SendMessageBody { text })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl StreamApi for LiveApi {
    async fn stream_snapshot(&self, stream_id: &str) -> LiveResult<StreamSnapshot> {
        let url = self.endpoint(&format!("creator/streams/{stream_id}/snapshot"))?;
        self.get_json(url).await
    }

    async fn stream_stats(&self, stream_id: &str) -> LiveResult<StreamStats> {
        let url = self.endpoint(&format!("streams/{stream_id}/stats"))?;
        self.get_json(url).await
    }
}

/// Chat fallback: history since the stream's high-water mark
pub struct ChatHistoryPoller {
    api: Arc<dyn ChatApi>,
    stream_id: String,
    cursor: Cursor,
}

impl ChatHistoryPoller {
    pub fn new(api: Arc<dyn ChatApi>, stream_id: impl Into<String>, cursor: Cursor) -> Self {
        Self {
            api,
            stream_id: stream_id.into(),
            cursor,
        }
    }
}

#[async_trait]
impl PollSource for ChatHistoryPoller {
    type Item = ChatServerFrame;

    async fn poll(&self) -> LiveResult<Vec<ChatServerFrame>> {
        let messages = self
            .api
            .chat_history(&self.stream_id, self.cursor.get())
            .await?;
        Ok(messages.into_iter().map(ChatServerFrame::Message).collect())
    }
}

/// Control fallback: stream stats mapped onto control events
pub struct StreamStatsPoller {
    api: Arc<dyn StreamApi>,
    stream_id: String,
}

impl StreamStatsPoller {
    pub fn new(api: Arc<dyn StreamApi>, stream_id: impl Into<String>) -> Self {
        Self {
            api,
            stream_id: stream_id.into(),
        }
    }
}

#[async_trait]
impl PollSource for StreamStatsPoller {
    type Item = ControlServerFrame;

    async fn poll(&self) -> LiveResult<Vec<ControlServerFrame>> {
        let stats = self.api.stream_stats(&self.stream_id).await?;
        Ok(vec![
            ControlServerFrame::Viewers {
                count: stats.viewer_count,
            },
            ControlServerFrame::Health(WireHealth {
                viewer_count: stats.viewer_count,
                bitrate_kbps: stats.bitrate_kbps,
                fps: stats.fps,
                drop_rate: stats.drop_rate,
                timestamp: stats.timestamp,
            }),
        ])
    }
}
