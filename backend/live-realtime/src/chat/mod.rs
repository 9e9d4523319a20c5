pub mod buffer;
pub mod slow_mode;
pub mod stream;

pub use buffer::MessageBuffer;
pub use slow_mode::SlowMode;
pub use stream::{ChatOutbound, MessageStream, SendReceipt};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// High-water mark of confirmed message timestamps (epoch seconds), shared
/// with the chat poller as its `since` cursor. Only ever moves forward.
#[derive(Debug, Clone, Default)]
pub struct Cursor(Arc<AtomicI64>);

impl Cursor {
    pub fn get(&self) -> Option<i64> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn advance(&self, ts: i64) {
        self.0.fetch_max(ts, Ordering::SeqCst);
    }
}
