use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// Holds the handle of at most one background task (a retry, a debounce
/// timer, a subscription pump...).
#[derive(Debug, Default)]
pub struct TaskSlot(Mutex<Option<JoinHandle<()>>>);

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a new handle. A previous task is detached, not aborted: it may
    /// be the task doing the storing.
    pub fn set(&self, handle: JoinHandle<()>) {
        *self.lock() = Some(handle);
    }

    /// Aborts the held task, if any. Returns whether one was still running.
    pub fn abort(&self) -> bool {
        match self.lock().take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Whether a held task has not finished yet.
    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.abort();
    }
}
