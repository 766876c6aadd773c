//! Timer handles for component-owned timers
//!
//! Each logical component (heartbeat, boot retry, aligned data,
//! monitoring) owns its timers; all of them are driven by the tokio
//! monotonic clock. A handle aborts its task when replaced or stopped,
//! so restarting a timer with a new interval is a single call.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A restartable timer slot. Holds at most one scheduled task.
#[derive(Default)]
pub struct TimerSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run once after `delay`, replacing any pending run.
    pub fn timeout<F, Fut>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });
        self.replace(handle);
    }

    /// Run `task` every `interval`, first run after one full interval.
    pub fn interval<F, Fut>(&self, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick is skipped
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        self.replace(handle);
    }

    /// Run `task` every `interval`, with the first run delayed so that runs
    /// land on wall-clock multiples of the interval (clock-aligned data).
    pub fn interval_aligned<F, Fut>(&self, interval: Duration, first_delay: Duration, task: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(first_delay).await;
            task().await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        self.replace(handle);
    }

    /// Cancel the pending task, if any.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn replace(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.handle.lock().unwrap().replace(handle) {
            old.abort();
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once() {
        let slot = TimerSlot::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        slot.timeout(Duration::from_secs(5), move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_fires_repeatedly() {
        let slot = TimerSlot::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        slot.interval(Duration::from_secs(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_cancels_previous() {
        let slot = TimerSlot::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        slot.timeout(Duration::from_secs(5), move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        slot.timeout(Duration::from_secs(20), move || async move {
            c2.fetch_add(10, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn stop_cancels() {
        let slot = TimerSlot::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        slot.timeout(Duration::from_millis(20), move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        slot.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!slot.is_running());
    }
}
