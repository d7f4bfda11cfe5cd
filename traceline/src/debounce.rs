//! Coalescing debounce timer
//!
//! A [`Debouncer`] collapses any number of triggers into at most one tick
//! per window: the first trigger arms the timer, every further trigger
//! inside the window is absorbed into the same tick. The engine uses one to
//! keep bursts of activity from running the session-timeout check more than
//! once per window.

use std::time::Duration;

use tokio::sync::Notify;

pub struct Debouncer {
    notify: Notify,
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            notify: Notify::new(),
            window,
        }
    }

    /// Request a tick. Cheap, callable from anywhere, never blocks.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Completes once per armed window: waits for a trigger, sleeps out the
    /// window, then absorbs any trigger that arrived in the meantime.
    pub async fn tick(&self) {
        self.notify.notified().await;
        tokio::time::sleep(self.window).await;

        // triggers that landed during the sleep are part of this tick
        tokio::select! {
            biased;
            _ = self.notify.notified() => {}
            _ = std::future::ready(()) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_one_tick() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_secs(10)));
        let ticks = Arc::new(AtomicUsize::new(0));

        let worker = {
            let debouncer = debouncer.clone();
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    debouncer.tick().await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        for _ in 0..5 {
            debouncer.trigger();
        }

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_tick_separately() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_secs(10)));
        let ticks = Arc::new(AtomicUsize::new(0));

        let worker = {
            let debouncer = debouncer.clone();
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    debouncer.tick().await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        debouncer.trigger();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        debouncer.trigger();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_without_trigger() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_secs(10)));
        let ticks = Arc::new(AtomicUsize::new(0));

        let worker = {
            let debouncer = debouncer.clone();
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    debouncer.tick().await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        worker.abort();
    }
}
