//! One-way subscription endpoint.

use crate::error::SyncError;
use crate::worker::Worker;
use syncer_proto::{Backend, Message, Socket, SocketRole};

/// Connects to a publisher and hands every received message to a callback
/// on a background task.
///
/// The subject filter, if any, is part of the backend parameters.
pub struct Subscriber {
    worker: Worker,
}

impl Subscriber {
    /// Connect and start delivering messages.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint cannot be connected.
    pub async fn connect<B, F>(
        backend: &B,
        params: &B::Params,
        mut callback: F,
    ) -> Result<Self, SyncError>
    where
        B: Backend,
        F: FnMut(Message) + Send + 'static,
    {
        let mut socket = backend.open(SocketRole::Subscriber, params).await?;
        let wait = backend.wait_timeout();
        tracing::debug!(?params, "Subscriber connected");

        let worker = Worker::spawn("subscriber", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.wait() => break,
                    received = socket.receive(wait) => match received {
                        Ok(Some(message)) => callback(message),
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(error = %err, "Subscriber receive failed");
                            tokio::time::sleep(wait).await;
                        }
                    },
                }
            }
        });

        Ok(Self { worker })
    }

    /// Stop delivering and wait for the background task to exit.
    pub async fn shutdown(self) {
        self.worker.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryParams};
    use crate::publisher::Publisher;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn delivers_published_messages() {
        let backend = MemoryBackend::new();
        let params = MemoryParams::new("feed");
        let publisher = Publisher::bind(&backend, &params).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::connect(&backend, &params, move |message: Message| {
            let _ = tx.send(message);
        })
        .await
        .unwrap();

        publisher.publish(Message::from("hello")).await;

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.body(), b"hello");

        subscriber.shutdown().await;
    }
}
