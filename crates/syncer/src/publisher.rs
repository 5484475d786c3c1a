//! One-way broadcast endpoint.

use crate::error::SyncError;
use syncer_proto::{Backend, Message, Socket, SocketRole};
use tokio::sync::Mutex;

/// Binds an endpoint and broadcasts messages to every connected subscriber.
///
/// Publishing is fire-and-forget: failures are logged, never returned.
pub struct Publisher<B: Backend> {
    socket: Mutex<B::Socket>,
}

impl<B: Backend> Publisher<B> {
    /// Bind a publisher endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint cannot be bound.
    pub async fn bind(backend: &B, params: &B::Params) -> Result<Self, SyncError> {
        let socket = backend.open(SocketRole::Publisher, params).await?;
        tracing::debug!(?params, "Publisher bound");
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Broadcast a message.
    pub async fn publish(&self, message: Message) {
        let len = message.len();
        let subject = message.subject().to_string();
        if let Err(err) = self.socket.lock().await.send(message).await {
            tracing::warn!(error = %err, %subject, len, "Failed to publish message");
        }
    }
}
