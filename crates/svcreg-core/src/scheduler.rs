// # Reconnect Scheduler
//
// Single-shot, cancellable delayed task.
//
// The registrar owns one scheduler for provider reconnects and one for
// collision backoff. Each holds at most one pending task: scheduling again
// replaces the pending task, and dropping the scheduler cancels it.
//
// Tasks are spawned on the ambient tokio runtime, which for the registrar is
// its worker's runtime. Shutting that runtime down cancels anything pending.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Single-shot delayed task facility
#[derive(Debug, Default)]
pub struct ReconnectScheduler {
    pending: Option<JoinHandle<()>>,
}

impl ReconnectScheduler {
    /// Create a scheduler with nothing pending
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Run `task` once after `delay`
    ///
    /// Any task that is still pending is cancelled first.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.cancel() {
            debug!("Replacing pending scheduled task");
        }

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        }));
    }

    /// Cancel the pending task, if any
    ///
    /// # Returns
    ///
    /// `true` if a task was pending and has been cancelled
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether a task is scheduled and has not fired yet
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ReconnectScheduler::new();

        let counter = fired.clone();
        scheduler.schedule(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_pending());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_task() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ReconnectScheduler::new();

        for _ in 0..3 {
            let counter = fired.clone();
            scheduler.schedule(Duration::from_secs(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ReconnectScheduler::new();

        let counter = fired.clone();
        scheduler.schedule(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));

        {
            let mut scheduler = ReconnectScheduler::new();
            let counter = fired.clone();
            scheduler.schedule(Duration::from_secs(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
