pub mod api;
pub mod channel;
pub mod chat;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod playback;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::LiveConfig;
pub use error::{LiveError, LiveResult, MediaErrorClass};
pub use session::{LiveStreamSession, SessionDeps};
