//! Outstanding-work counter for orchestrator units.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Counts asynchronous units of work that have been dispatched but not
/// finished.
///
/// [`track`](Self::track) increments the count and returns a guard; dropping
/// the guard (normally, or while unwinding from a panic) decrements it. The
/// decrement to zero wakes every [`wait_idle`](Self::wait_idle) caller.
#[derive(Debug, Clone, Default)]
pub struct WorkTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    outstanding: AtomicUsize,
    idle: Notify,
}

/// One tracked unit of work; decrements the tracker when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard immediately ends the tracked unit"]
pub struct WorkGuard {
    inner: Arc<TrackerInner>,
}

impl WorkTracker {
    /// Creates a tracker with nothing outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new unit of work.
    pub fn track(&self) -> WorkGuard {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        WorkGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of units currently outstanding.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Waits until no unit is outstanding. Returns immediately if idle.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent final drop is not missed.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
