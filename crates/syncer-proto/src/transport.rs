//! Transport contract implemented by pluggable backends.

use crate::message::Message;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Default bounded slice for receive polls.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Role of a transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketRole {
    /// One-way broadcast (binds)
    Publisher,
    /// One-way subscription (connects)
    Subscriber,
    /// Request side of request/reply (connects)
    Requester,
    /// Reply side of request/reply (binds)
    Replier,
}

impl SocketRole {
    /// Check whether this role binds (as opposed to connects).
    #[must_use]
    pub fn binds(self) -> bool {
        matches!(self, SocketRole::Publisher | SocketRole::Replier)
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketRole::Publisher => write!(f, "publisher"),
            SocketRole::Subscriber => write!(f, "subscriber"),
            SocketRole::Requester => write!(f, "requester"),
            SocketRole::Replier => write!(f, "replier"),
        }
    }
}

/// A bound or connected transport endpoint.
///
/// Request/reply sockets alternate strictly: a replier sends exactly one
/// reply per received request; a requester receives replies only for its
/// latest request.
#[async_trait]
pub trait Socket: Send + 'static {
    /// Send a message.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails to send.
    async fn send(&mut self, message: Message) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a message.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails to poll or receive.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>, TransportError>;
}

/// Factory for transport endpoints.
#[async_trait]
pub trait Backend: Clone + Send + Sync + 'static {
    /// Endpoint parameters (address, subject filter, ...).
    type Params: Clone + fmt::Debug + Send + Sync + 'static;

    /// Socket type produced by [`Backend::open`].
    type Socket: Socket;

    /// Bounded slice for receive polls, so workers notice shutdown promptly.
    fn wait_timeout(&self) -> Duration {
        DEFAULT_WAIT_TIMEOUT
    }

    /// Upper bound on how long subscribers need to finish connecting after
    /// a publisher binds. Messages published earlier may be missed.
    fn connect_period(&self) -> Duration;

    /// Open an endpoint in the given role.
    ///
    /// # Errors
    ///
    /// Returns error if binding or connecting fails.
    async fn open(
        &self,
        role: SocketRole,
        params: &Self::Params,
    ) -> Result<Self::Socket, TransportError>;
}

/// Errors reported by transport backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Endpoint already bound
    #[error("address already in use: {0}")]
    AddressInUse(String),
    /// Connect or bind failed
    #[error("connection error: {0}")]
    Connection(String),
    /// Send failed
    #[error("send error: {0}")]
    Send(String),
    /// Receive or poll failed
    #[error("receive error: {0}")]
    Receive(String),
    /// Operation not valid for the socket role
    #[error("operation not supported by {0} socket")]
    Unsupported(SocketRole),
    /// No reply before the deadline
    #[error("timed out waiting for reply")]
    Timeout,
    /// Message exceeds the backend limit
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
}
