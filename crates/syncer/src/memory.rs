//! In-process transport backend.
//!
//! Endpoints are named slots in a shared hub. Publishers and repliers bind a
//! name exclusively until their socket is dropped; subscribers and
//! requesters connect to a name whether or not anything is bound yet.
//! Requests sent while no replier is bound are lost, like a datagram to a
//! closed port, and the requester simply times out.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use syncer_proto::{Backend, Message, Socket, SocketRole, TransportError, DEFAULT_WAIT_TIMEOUT};
use tokio::sync::{mpsc, oneshot};

/// Default connect period for in-process endpoints.
pub const DEFAULT_CONNECT_PERIOD: Duration = Duration::from_millis(20);

/// Endpoint parameters for [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryParams {
    /// Endpoint name
    pub endpoint: String,
    /// Subject prefix filter for subscribers (empty accepts everything)
    pub subject: String,
}

impl MemoryParams {
    /// Parameters for the named endpoint without a subject filter.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            subject: String::new(),
        }
    }

    /// Restrict a subscriber to subjects starting with `subject`.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

impl From<&str> for MemoryParams {
    fn from(endpoint: &str) -> Self {
        Self::new(endpoint)
    }
}

struct SubscriberLink {
    filter: String,
    tx: mpsc::UnboundedSender<Message>,
}

struct PendingRequest {
    request: Message,
    reply: oneshot::Sender<Message>,
}

#[derive(Default)]
struct Endpoint {
    publisher_bound: bool,
    subscribers: Vec<SubscriberLink>,
    replier: Option<mpsc::UnboundedSender<PendingRequest>>,
}

impl Endpoint {
    fn prune(&mut self) {
        self.subscribers.retain(|link| !link.tx.is_closed());
    }

    fn is_idle(&self) -> bool {
        !self.publisher_bound && self.replier.is_none() && self.subscribers.is_empty()
    }
}

#[derive(Default)]
struct Hub {
    endpoints: Mutex<HashMap<String, Endpoint>>,
}

impl Hub {
    fn bind_publisher(&self, name: &str) -> Result<(), TransportError> {
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints.entry(name.to_string()).or_default();
        if endpoint.publisher_bound {
            return Err(TransportError::AddressInUse(name.to_string()));
        }
        endpoint.publisher_bound = true;
        Ok(())
    }

    fn bind_replier(
        &self,
        name: &str,
    ) -> Result<mpsc::UnboundedReceiver<PendingRequest>, TransportError> {
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints.entry(name.to_string()).or_default();
        if endpoint.replier.is_some() {
            return Err(TransportError::AddressInUse(name.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        endpoint.replier = Some(tx);
        Ok(rx)
    }

    fn subscribe(&self, params: &MemoryParams) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints.entry(params.endpoint.clone()).or_default();
        endpoint.prune();
        endpoint.subscribers.push(SubscriberLink {
            filter: params.subject.clone(),
            tx,
        });
        rx
    }

    fn publish(&self, name: &str, message: &Message) {
        let mut endpoints = self.endpoints.lock();
        let Some(endpoint) = endpoints.get_mut(name) else {
            return;
        };
        endpoint.prune();
        for link in &endpoint.subscribers {
            if message.matches(&link.filter) {
                let _ = link.tx.send(message.clone());
            }
        }
    }

    fn request(&self, name: &str, request: Message) -> Option<oneshot::Receiver<Message>> {
        let endpoints = self.endpoints.lock();
        let replier = endpoints.get(name)?.replier.as_ref()?;
        let (reply, rx) = oneshot::channel();
        replier.send(PendingRequest { request, reply }).ok()?;
        Some(rx)
    }

    /// Release whatever `role` holds on the endpoint and forget the
    /// endpoint once nothing refers to it.
    fn release(&self, name: &str, role: SocketRole) {
        let mut endpoints = self.endpoints.lock();
        let Some(endpoint) = endpoints.get_mut(name) else {
            return;
        };
        match role {
            SocketRole::Publisher => endpoint.publisher_bound = false,
            SocketRole::Replier => endpoint.replier = None,
            SocketRole::Subscriber | SocketRole::Requester => {}
        }
        endpoint.prune();
        if endpoint.is_idle() {
            endpoints.remove(name);
        }
    }
}

/// Transport backend connecting endpoints within one process.
///
/// Clones share the same hub; independent instances never see each other.
#[derive(Clone)]
pub struct MemoryBackend {
    hub: Arc<Hub>,
    connect_period: Duration,
    wait_timeout: Duration,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            hub: Arc::new(Hub::default()),
            connect_period: DEFAULT_CONNECT_PERIOD,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("connect_period", &self.connect_period)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    /// Create a backend with its own hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the connect period.
    #[must_use]
    pub fn with_connect_period(mut self, period: Duration) -> Self {
        self.connect_period = period;
        self
    }

    /// Override the receive poll slice.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Params = MemoryParams;
    type Socket = MemorySocket;

    fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    fn connect_period(&self) -> Duration {
        self.connect_period
    }

    async fn open(
        &self,
        role: SocketRole,
        params: &MemoryParams,
    ) -> Result<MemorySocket, TransportError> {
        let hub = Arc::clone(&self.hub);
        let endpoint = params.endpoint.clone();

        let inner = match role {
            SocketRole::Publisher => {
                hub.bind_publisher(&endpoint)?;
                Inner::Publisher
            }
            SocketRole::Replier => Inner::Replier {
                rx: hub.bind_replier(&endpoint)?,
                reply: None,
            },
            SocketRole::Subscriber => Inner::Subscriber {
                rx: hub.subscribe(params),
            },
            SocketRole::Requester => Inner::Requester { pending: None },
        };

        tracing::trace!(%role, endpoint = %endpoint, "Opened memory socket");
        Ok(MemorySocket {
            hub,
            endpoint,
            inner,
        })
    }
}

enum Inner {
    Publisher,
    Subscriber {
        rx: mpsc::UnboundedReceiver<Message>,
    },
    Requester {
        pending: Option<oneshot::Receiver<Message>>,
    },
    Replier {
        rx: mpsc::UnboundedReceiver<PendingRequest>,
        reply: Option<oneshot::Sender<Message>>,
    },
}

impl Inner {
    fn role(&self) -> SocketRole {
        match self {
            Inner::Publisher => SocketRole::Publisher,
            Inner::Subscriber { .. } => SocketRole::Subscriber,
            Inner::Requester { .. } => SocketRole::Requester,
            Inner::Replier { .. } => SocketRole::Replier,
        }
    }
}

/// Socket produced by [`MemoryBackend`].
pub struct MemorySocket {
    hub: Arc<Hub>,
    endpoint: String,
    inner: Inner,
}

#[async_trait]
impl Socket for MemorySocket {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        if message.len() > Message::MAX_SIZE {
            return Err(TransportError::TooLarge(message.len()));
        }

        match &mut self.inner {
            Inner::Publisher => {
                self.hub.publish(&self.endpoint, &message);
                Ok(())
            }
            Inner::Requester { pending } => {
                *pending = self.hub.request(&self.endpoint, message);
                if pending.is_none() {
                    tracing::trace!(endpoint = %self.endpoint, "No replier bound, request lost");
                }
                Ok(())
            }
            Inner::Replier { reply, .. } => {
                let reply = reply
                    .take()
                    .ok_or_else(|| TransportError::Send("no request to reply to".to_string()))?;
                if reply.send(message).is_err() {
                    tracing::trace!(endpoint = %self.endpoint, "Requester went away before reply");
                }
                Ok(())
            }
            Inner::Subscriber { .. } => Err(TransportError::Unsupported(SocketRole::Subscriber)),
        }
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        match &mut self.inner {
            Inner::Subscriber { rx } => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(message)) => Ok(Some(message)),
                Ok(None) => Err(TransportError::Receive("endpoint closed".to_string())),
                Err(_) => Ok(None),
            },
            Inner::Requester { pending } => {
                let Some(rx) = pending.as_mut() else {
                    tokio::time::sleep(timeout).await;
                    return Ok(None);
                };
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(message)) => {
                        *pending = None;
                        Ok(Some(message))
                    }
                    Ok(Err(_)) => {
                        // Replier dropped the request unanswered
                        *pending = None;
                        Ok(None)
                    }
                    Err(_) => Ok(None),
                }
            }
            Inner::Replier { rx, reply } => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(pending)) => {
                    *reply = Some(pending.reply);
                    Ok(Some(pending.request))
                }
                Ok(None) => Err(TransportError::Receive("endpoint closed".to_string())),
                Err(_) => Ok(None),
            },
            Inner::Publisher => Err(TransportError::Unsupported(SocketRole::Publisher)),
        }
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        let role = self.inner.role();
        match &mut self.inner {
            // Closing first lets the release below prune this link.
            Inner::Subscriber { rx } => rx.close(),
            Inner::Requester { .. } => return,
            Inner::Publisher | Inner::Replier { .. } => {}
        }
        self.hub.release(&self.endpoint, role);
    }
}
