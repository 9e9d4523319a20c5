//! Server-imposed slow mode: after a successful send, further sends are
//! blocked for the window. A one-second countdown drives the UI.

use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

const COUNTDOWN: &str = "countdown";

#[derive(Debug, Default)]
struct Window {
    seconds: u64,
    blocked_until: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct SlowMode {
    window: Arc<Mutex<Window>>,
    countdown: Arc<watch::Sender<u64>>,
    scheduler: Arc<Mutex<Scheduler>>,
}

impl Default for SlowMode {
    fn default() -> Self {
        Self::new()
    }
}

fn remaining(window: &Window, now: Instant) -> u64 {
    match window.blocked_until {
        Some(until) if until > now => (until - now).as_secs_f64().ceil() as u64,
        _ => 0,
    }
}

impl SlowMode {
    pub fn new() -> Self {
        let (countdown, _) = watch::channel(0);
        Self {
            window: Arc::new(Mutex::new(Window::default())),
            countdown: Arc::new(countdown),
            scheduler: Arc::new(Mutex::new(Scheduler::new("slow-mode"))),
        }
    }

    /// Zero disables slow mode and lifts any running cooldown.
    pub fn set_window(&self, seconds: u64) {
        let mut window = self.window.lock();
        window.seconds = seconds;
        if seconds == 0 {
            window.blocked_until = None;
            drop(window);
            self.scheduler.lock().cancel(COUNTDOWN);
            self.countdown.send_replace(0);
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window.lock().seconds
    }

    /// Block sends for the current window. No-op when slow mode is off.
    pub fn start_cooldown(&self) {
        let seconds = {
            let mut window = self.window.lock();
            if window.seconds == 0 {
                return;
            }
            window.blocked_until = Some(Instant::now() + Duration::from_secs(window.seconds));
            window.seconds
        };
        self.countdown.send_replace(seconds);

        let state = self.window.clone();
        let countdown = self.countdown.clone();
        self.scheduler.lock().spawn(COUNTDOWN, async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let left = remaining(&state.lock(), Instant::now());
                countdown.send_replace(left);
                if left == 0 {
                    break;
                }
            }
        });
    }

    /// Whole seconds until the next send is allowed
    pub fn remaining_secs(&self) -> u64 {
        remaining(&self.window.lock(), Instant::now())
    }

    pub fn can_send(&self) -> bool {
        self.remaining_secs() == 0
    }

    pub fn countdown(&self) -> watch::Receiver<u64> {
        self.countdown.subscribe()
    }
}
