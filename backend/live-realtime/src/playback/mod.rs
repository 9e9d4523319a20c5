//! Low-latency playback: fast bring-up, classified recovery and live-edge
//! tracking around a platform media engine.

pub mod engine;
pub mod session;
pub mod state;
pub mod tunables;

pub use engine::{
    EngineError, EngineErrorKind, EngineEvent, MediaEngine, PlaybackBackend, SeekableRange,
};
pub use session::{PlaybackSession, PlaybackSnapshot};
pub use state::{PhaseTimestamps, PlaybackState, RecoveryBudget, RecoveryStep};
pub use tunables::{EngineTunables, NetworkProfile, NetworkTier};
