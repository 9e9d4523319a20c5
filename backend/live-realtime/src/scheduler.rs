//! Named, cancelable timer tasks owned by a single manager.
//!
//! Every timer a manager starts (reconnect delay, poll loop, recovery wait,
//! countdown) is registered here under a name. Re-using a name replaces the
//! previous task. Disposal aborts everything and refuses new work, so nothing
//! scheduled by a disposed owner can run afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
pub struct Scheduler {
    owner: &'static str,
    tasks: HashMap<&'static str, JoinHandle<()>>,
    disposed: bool,
}

impl Scheduler {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            tasks: HashMap::new(),
            disposed: false,
        }
    }

    /// Start `task` now under `name`, aborting any task already using it.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.disposed {
            debug!(owner = self.owner, task = name, "Scheduler disposed, ignoring task");
            return;
        }
        if let Some(previous) = self.tasks.insert(name, tokio::spawn(task)) {
            previous.abort();
        }
    }

    /// Run `task` after `delay`.
    pub fn schedule<F>(&mut self, name: &'static str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name, async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    /// Returns true if a still-running task was aborted.
    pub fn cancel(&mut self, name: &'static str) -> bool {
        match self.tasks.remove(name) {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &'static str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    pub fn dispose(&mut self) {
        self.cancel_all();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_task_runs_after_delay() {
        let mut scheduler = Scheduler::new("test");
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();

        scheduler.schedule("tick", Duration::from_secs(2), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_scheduled("tick"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled("tick"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_name_replaces_previous_task() {
        let mut scheduler = Scheduler::new("test");
        let fired = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let counter = fired.clone();
            scheduler.schedule("reconnect", Duration::from_secs(1), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_and_refuses_new_work() {
        let mut scheduler = Scheduler::new("test");
        let fired = Arc::new(AtomicU32::new(0));

        let counter = fired.clone();
        scheduler.schedule("a", Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.dispose();

        let counter = fired.clone();
        scheduler.schedule("b", Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reports_running_task() {
        let mut scheduler = Scheduler::new("test");
        scheduler.schedule("wait", Duration::from_secs(10), async {});

        assert!(scheduler.cancel("wait"));
        assert!(!scheduler.cancel("wait"));
    }
}
