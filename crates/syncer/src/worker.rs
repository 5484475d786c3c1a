//! Background task bookkeeping shared by the messaging primitives.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receiving side of a worker's shutdown signal.
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is requested or the owning worker is gone.
    pub(crate) async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A spawned task plus the means to stop it.
///
/// Dropping a worker signals it to exit at its next suspension point;
/// [`Worker::stop`] additionally waits for it to finish.
pub(crate) struct Worker {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `task` on the current Tokio runtime.
    pub(crate) fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(task(ShutdownSignal { rx }));
        tracing::trace!(worker = name, "Worker started");

        Self {
            name,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Ask the task to exit without waiting for it.
    pub(crate) fn signal(&self) {
        self.shutdown.send_replace(true);
    }

    /// Check whether the task has completed.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the task and wait for it to finish.
    pub(crate) async fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::error!(worker = self.name, "Worker panicked");
                }
            }
        }
        tracing::trace!(worker = self.name, "Worker stopped");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal();
    }
}
