use crate::error::MediaErrorClass;
use crate::metrics::PhaseDurations;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "class", rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    BringingUp,
    Playing,
    /// A fatal engine error was seen; recovery is waiting on a precondition
    Degraded(MediaErrorClass),
    /// A recovery action was issued; waiting for data to resume
    Recovering(MediaErrorClass),
    Fatal(MediaErrorClass),
}

impl PlaybackState {
    pub fn is_recovering(&self) -> bool {
        matches!(self, PlaybackState::Degraded(_) | PlaybackState::Recovering(_))
    }

    pub fn recovering_class(&self) -> Option<MediaErrorClass> {
        match self {
            PlaybackState::Degraded(class) | PlaybackState::Recovering(class) => Some(*class),
            _ => None,
        }
    }
}

/// Bring-up milestones
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimestamps {
    pub started: Instant,
    pub preconnect: Option<Instant>,
    pub manifest: Option<Instant>,
    pub engine_init: Option<Instant>,
    pub first_frame: Option<Instant>,
}

impl PhaseTimestamps {
    pub fn start(now: Instant) -> Self {
        Self {
            started: now,
            preconnect: None,
            manifest: None,
            engine_init: None,
            first_frame: None,
        }
    }

    fn offset(&self, at: Option<Instant>) -> Option<u64> {
        at.map(|at| at.saturating_duration_since(self.started).as_millis() as u64)
    }

    /// First frame minus bring-up start; never negative
    pub fn join_time(&self) -> Option<Duration> {
        self.first_frame
            .map(|at| at.saturating_duration_since(self.started))
    }

    pub fn durations(&self) -> PhaseDurations {
        PhaseDurations {
            preconnect_ms: self.offset(self.preconnect),
            manifest_ms: self.offset(self.manifest),
            engine_init_ms: self.offset(self.engine_init),
            first_frame_ms: self.offset(self.first_frame).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    ResumeNetwork { attempt: u32 },
    RecoverMedia { attempt: u32 },
    /// Tear the engine down and bring it up again
    Rebuild,
    GiveUp(MediaErrorClass),
}

/// Recovery attempts left for the current source.
///
/// Network and media attempts are counted per bring-up. A media rebuild is
/// allowed once per source and starts a fresh bring-up.
#[derive(Debug, Clone)]
pub struct RecoveryBudget {
    max_network: u32,
    max_media: u32,
    network_used: u32,
    media_used: u32,
    rebuilt: bool,
}

impl RecoveryBudget {
    pub fn new(max_network: u32, max_media: u32) -> Self {
        Self {
            max_network,
            max_media,
            network_used: 0,
            media_used: 0,
            rebuilt: false,
        }
    }

    pub fn next_step(&mut self, class: MediaErrorClass) -> RecoveryStep {
        match class {
            MediaErrorClass::Network if self.network_used < self.max_network => {
                self.network_used += 1;
                RecoveryStep::ResumeNetwork {
                    attempt: self.network_used,
                }
            }
            MediaErrorClass::Media if self.media_used < self.max_media => {
                self.media_used += 1;
                RecoveryStep::RecoverMedia {
                    attempt: self.media_used,
                }
            }
            MediaErrorClass::Media if !self.rebuilt => {
                self.rebuilt = true;
                self.network_used = 0;
                self.media_used = 0;
                RecoveryStep::Rebuild
            }
            class => RecoveryStep::GiveUp(class),
        }
    }

    /// Playback came back: the next error starts a fresh episode. The
    /// single rebuild stays spent for this source.
    pub fn recovered(&mut self) {
        self.network_used = 0;
        self.media_used = 0;
    }

    /// Attempts spent in the current error episode
    pub fn attempts(&self) -> u32 {
        self.network_used + self.media_used
    }
}
