//! Seams to the platform's adaptive-streaming engine.

use super::tunables::{EngineTunables, NetworkProfile};
use crate::error::{LiveResult, MediaErrorClass};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Error families reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    Network,
    Media,
    Mux,
    KeySystem,
    Other,
}

impl EngineErrorKind {
    pub fn classify(self) -> MediaErrorClass {
        match self {
            EngineErrorKind::Network => MediaErrorClass::Network,
            EngineErrorKind::Media | EngineErrorKind::Mux => MediaErrorClass::Media,
            EngineErrorKind::KeySystem | EngineErrorKind::Other => MediaErrorClass::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub fatal: bool,
    pub details: String,
}

impl EngineError {
    pub fn fatal(kind: EngineErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            fatal: true,
            details: details.into(),
        }
    }

    pub fn class(&self) -> MediaErrorClass {
        self.kind.classify()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// First frame rendered
    FirstFrame,
    /// Fragments are flowing again after a stall or recovery
    DataResumed,
    Error(EngineError),
}

/// Seekable window of the live stream, in seconds of media time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekableRange {
    pub start: f64,
    pub end: f64,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Load the manifest and prepare the source.
    async fn load_source(&self, url: &str) -> LiveResult<()>;
    fn attach_media(&self) -> LiveResult<()>;
    /// Resume fragment loading after a network error.
    fn start_load(&self);
    fn recover_media_error(&self);
    fn seekable_range(&self) -> Option<SeekableRange>;
    fn current_time(&self) -> f64;
    fn seek(&self, position: f64);
    fn destroy(&self);
}

/// Platform services used during bring-up
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Hint the platform to open a connection to `origin` early.
    fn preconnect(&self, origin: &str);
    async fn preload_manifest(&self, url: &str) -> LiveResult<()>;
    fn network_profile(&self) -> NetworkProfile;
    /// Build an engine that reports through `events`.
    fn create_engine(
        &self,
        tunables: &EngineTunables,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> LiveResult<Arc<dyn MediaEngine>>;
}

/// Owns the active engine; destroys it when dropped.
pub(crate) struct EngineGuard(Arc<dyn MediaEngine>);

impl EngineGuard {
    pub(crate) fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self(engine)
    }

    pub(crate) fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.0
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        self.0.destroy();
    }
}
