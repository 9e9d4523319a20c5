//! Reachability tracking shared by every channel and playback session.
//!
//! The platform feeds [`ConnectionMonitor::report`]; the monitor never polls.
//! Listeners only hear about actual changes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

pub struct ConnectionMonitor {
    online: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("online", &self.is_online())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl ConnectionMonitor {
    pub fn new(initially_online: bool) -> Arc<Self> {
        let (online, _) = watch::channel(initially_online);
        Arc::new(Self {
            online,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn is_online(&self) -> bool {
        !self.torn_down.load(Ordering::SeqCst) && *self.online.borrow()
    }

    /// Record the platform's current reachability.
    pub fn report(&self, online: bool) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }

        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }

        info!(online, "Reachability changed");
        // Invoke outside the lock so listeners may subscribe or unsubscribe
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(online);
        }
    }

    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if !self.torn_down.load(Ordering::SeqCst) {
            self.listeners.lock().push((id, Arc::new(listener)));
        }
        Subscription {
            monitor: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Resolves `true` as soon as reachability is (or becomes) true, `false`
    /// once `timeout` elapses or the monitor is torn down.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        if self.is_online() {
            return true;
        }
        if self.torn_down.load(Ordering::SeqCst) {
            return false;
        }

        let mut rx = self.online.subscribe();
        let woke = matches!(
            tokio::time::timeout(
                timeout,
                rx.wait_for(|online| *online || self.torn_down.load(Ordering::SeqCst)),
            )
            .await,
            Ok(Ok(_))
        );
        woke && self.is_online()
    }

    /// Drop all listeners and release waiters with `false`.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listeners.lock().clear();
        self.online.send_replace(false);
        debug!("Connection monitor torn down");
    }
}

/// Listener registration; unsubscribes when dropped.
#[derive(Debug)]
pub struct Subscription {
    monitor: Weak<ConnectionMonitor>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.unsubscribe(self.id);
        }
    }
}
