//! Reply side of request/reply.

use crate::error::SyncError;
use crate::worker::Worker;
use syncer_proto::{Backend, Message, Socket, SocketRole};

/// Binds an endpoint and answers each request with the handler's reply.
pub struct Replier {
    worker: Worker,
}

impl Replier {
    /// Bind and start answering requests on a background task.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint cannot be bound.
    pub async fn bind<B, F>(backend: &B, params: &B::Params, mut handler: F) -> Result<Self, SyncError>
    where
        B: Backend,
        F: FnMut(&Message) -> Message + Send + 'static,
    {
        let mut socket = backend.open(SocketRole::Replier, params).await?;
        let wait = backend.wait_timeout();
        tracing::debug!(?params, "Replier bound");

        let worker = Worker::spawn("replier", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.wait() => break,
                    received = socket.receive(wait) => match received {
                        Ok(Some(request)) => {
                            let reply = handler(&request);
                            if let Err(err) = socket.send(reply).await {
                                tracing::warn!(error = %err, "Failed to send reply");
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(error = %err, "Replier receive failed");
                            tokio::time::sleep(wait).await;
                        }
                    },
                }
            }
        });

        Ok(Self { worker })
    }

    /// Stop answering and wait for the background task to exit.
    pub async fn shutdown(self) {
        self.worker.stop().await;
    }
}
