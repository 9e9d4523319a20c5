//! Primary transport: a persistent WebSocket pumped into mpsc channels.

use crate::error::{LiveError, LiveResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    /// Remote close or transport error
    Closed(Option<String>),
}

/// An open socket. Dropping `outbound` closes it.
#[derive(Debug)]
pub struct SocketLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketFrame>,
}

/// The far side of a [`SocketLink`]: what was written, and where frames come from.
#[derive(Debug)]
pub struct LinkPeer {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub frames: mpsc::UnboundedSender<SocketFrame>,
}

impl SocketLink {
    pub fn channel() -> (SocketLink, LinkPeer) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (frames, inbound) = mpsc::unbounded_channel();
        (SocketLink { outbound, inbound }, LinkPeer { sent, frames })
    }
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str) -> LiveResult<SocketLink>;
}

#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str) -> LiveResult<SocketLink> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))?;
        debug!(url, "WebSocket connected");

        let (mut sink, mut source) = stream.split();
        let (link, peer) = SocketLink::channel();
        let LinkPeer { mut sent, frames } = peer;

        tokio::spawn(async move {
            while let Some(text) = sent.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("WebSocket write failed: {}", e);
                    return;
                }
            }
            // Owner dropped the link: intentional close
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if frames.send(SocketFrame::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.as_str().to_owned());
                        let _ = frames.send(SocketFrame::Closed(reason));
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = frames.send(SocketFrame::Closed(Some(e.to_string())));
                        return;
                    }
                }
            }
            let _ = frames.send(SocketFrame::Closed(None));
        });

        Ok(link)
    }
}
