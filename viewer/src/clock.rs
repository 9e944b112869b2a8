//! One-shot timers with explicit cancellation.

use std::time::Duration;
use tokio::task::AbortHandle;

/// Source of one-shot timers.
pub trait Clock: Send + Sync {
    /// Run `on_fire` once after `delay`, unless the returned handle is
    /// cancelled or dropped first.
    fn after(&self, delay: Duration, on_fire: Box<dyn FnOnce() + Send>) -> CancelHandle;
}

/// Handle to a pending timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct CancelHandle {
    task: Option<AbortHandle>,
}

impl CancelHandle {
    /// Wrap the task that fires the timer.
    pub fn new(task: AbortHandle) -> Self {
        Self { task: Some(task) }
    }

    /// Stop the timer. Calling this twice is harmless.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Timers backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn after(&self, delay: Duration, on_fire: Box<dyn FnOnce() + Send>) -> CancelHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });
        CancelHandle::new(task.abort_handle())
    }
}
