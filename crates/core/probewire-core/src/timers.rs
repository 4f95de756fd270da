//! Restartable interval and one-shot timers.
//!
//! Both wrap a spawned Tokio task. Starting a running timer replaces it;
//! stopping or dropping cancels the task. Callbacks run on the task, so they
//! must not assume they are called from the code that started the timer.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Recurring timer firing every `period`, first tick one period after start
#[derive(Debug, Default)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Create a stopped timer
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer. Must be called inside a Tokio runtime.
    pub fn start<F>(&mut self, period: Duration, tick: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stop();
        let period = period.max(Duration::from_millis(1));
        self.handle = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick();
            }
        }));
    }

    /// Cancel the timer; no-op when stopped
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether the timer is scheduled
    #[must_use] pub fn is_started(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One-shot timer; restarting pushes the deadline back
#[derive(Debug, Default)]
pub struct Delay {
    handle: Option<JoinHandle<()>>,
}

impl Delay {
    /// Create an idle delay
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `fire` after `delay`, cancelling any pending run.
    /// Must be called inside a Tokio runtime.
    pub fn start<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stop();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            fire();
        }));
    }

    /// Cancel the pending run; no-op when idle
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a run is still pending
    #[must_use] pub fn is_started(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_every_period() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut timer = Timer::new();
        timer.start(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_started());

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        timer.stop();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!timer.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_restart_pushes_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut delay = Delay::new();

        let counter = fired.clone();
        delay.start(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        time::sleep(Duration::from_millis(60)).await;

        let counter = fired.clone();
        delay.start(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let counter = fired.clone();
            let mut delay = Delay::new();
            delay.start(Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
