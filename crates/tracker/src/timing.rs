//! Debounce and throttle primitives shared by the observers.
//!
//! [`Debouncer`] is last-write-wins: scheduling replaces (aborts) whatever
//! was pending. [`Throttle`] admits at most one call per window, measured on
//! the injected clock.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use storefront_core::clock::elapsed_ms;

/// Spawn on the ambient runtime, if there is one. Outside a runtime the task
/// is dropped.
pub fn spawn_detached<F>(task: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(task)),
        Err(_) => {
            debug!("no async runtime, task dropped");
            None
        }
    }
}

pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Run `task` once `delay` has passed without another call to `schedule`.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = spawn_detached(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(previous) = std::mem::replace(&mut *self.pending.lock(), handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct Throttle {
    window_ms: u64,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl Throttle {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last: Mutex::new(None),
        }
    }

    /// `true` when the window since the last admitted call has elapsed.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last.lock();
        match *last {
            Some(at) if elapsed_ms(at, now) < self.window_ms => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn reset(&self) {
        *self.last.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_last_write_wins() {
        let debouncer = Debouncer::new(Duration::from_millis(150));
        let fired = Arc::new(Mutex::new(Vec::new()));

        for value in [1, 2, 3] {
            let fired = fired.clone();
            debouncer.schedule(async move { fired.lock().push(value) });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*fired.lock(), vec![3]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_cancel() {
        let debouncer = Debouncer::new(Duration::from_millis(150));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        debouncer.schedule(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_throttle_window() {
        let throttle = Throttle::new(100);
        let t0 = Utc::now();
        assert!(throttle.try_acquire(t0));
        assert!(!throttle.try_acquire(t0 + chrono::Duration::milliseconds(99)));
        assert!(throttle.try_acquire(t0 + chrono::Duration::milliseconds(100)));

        throttle.reset();
        assert!(throttle.try_acquire(t0));
    }

    #[test]
    fn test_spawn_without_runtime_is_dropped() {
        assert!(spawn_detached(async {}).is_none());
    }
}
