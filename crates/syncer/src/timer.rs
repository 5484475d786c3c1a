//! One-shot delayed task.

use crate::worker::Worker;
use std::future::Future;
use std::time::Duration;

/// Runs a future once after a delay unless reset first.
///
/// Must be armed from within a Tokio runtime.
#[derive(Default)]
pub struct Timer {
    worker: Option<Worker>,
}

impl Timer {
    /// Create an idle timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, cancelling any previously armed task.
    pub fn set<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reset();
        self.worker = Some(Worker::spawn("timer", move |mut shutdown| async move {
            tokio::select! {
                biased;
                () = shutdown.wait() => {}
                () = tokio::time::sleep(delay) => task.await,
            }
        }));
    }

    /// Cancel the armed task if it has not fired yet.
    pub fn reset(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.signal();
        }
    }

    /// Check whether a task is armed and has not completed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Cancel the armed task and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();

        let counter = Arc::clone(&fired);
        timer.set(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();

        let counter = Arc::clone(&fired);
        timer.set(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.reset();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_task() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            timer.set(Duration::from_millis(100), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        timer.shutdown().await;
    }
}
