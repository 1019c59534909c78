//! Owned timers
//!
//! Every timeout in the crate is a [`TimerGuard`]: dropping the guard cancels
//! the timer, so a timer can never outlive the state it guards.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A spawned delayed action, aborted when dropped
#[derive(Debug)]
pub struct TimerGuard {
    handle: Option<JoinHandle<()>>,
}

impl TimerGuard {
    /// Run `action` after `delay` unless the guard is dropped first
    pub fn after<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Wrap an already spawned task
    #[must_use]
    pub fn from_task(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// True once the action ran or was cancelled
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the timer
    pub fn cancel(self) {
        drop(self);
    }

    /// Let the task run to completion without the guard
    ///
    /// Used by a timer action that removes its own guard.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let guard = TimerGuard::after(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(guard.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let guard = TimerGuard::after(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });
        guard.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
