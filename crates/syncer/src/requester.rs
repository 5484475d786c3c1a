//! Request side of request/reply.
//!
//! At most one request is in flight. Issuing a new request while one is
//! outstanding pre-empts it: the old request is abandoned without invoking
//! the callback and the new one is sent in its place. Requests issued before
//! the worker picks them up coalesce; only the latest is sent.

use crate::error::SyncError;
use crate::worker::{ShutdownSignal, Worker};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use syncer_proto::{Backend, Message, Socket, SocketRole, TransportError};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default time to wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug)]
struct PendingRequest {
    message: Message,
    timeout: Duration,
}

#[derive(Default)]
struct RequestSlot {
    pending: Mutex<Option<PendingRequest>>,
    notify: Notify,
}

impl RequestSlot {
    fn submit(&self, request: PendingRequest) {
        if self.pending.lock().replace(request).is_some() {
            tracing::trace!("Queued request superseded");
        }
        self.notify.notify_one();
    }

    async fn next(&self) -> PendingRequest {
        loop {
            self.notify.notified().await;
            let request = self.pending.lock().take();
            if let Some(request) = request {
                return request;
            }
        }
    }
}

/// Cloneable handle for issuing requests to a [`Requester`].
#[derive(Clone)]
pub struct RequestHandle {
    slot: Arc<RequestSlot>,
    default_timeout: Duration,
}

impl RequestHandle {
    /// Issue a request with the default timeout. Never blocks.
    pub fn request(&self, message: Message) {
        self.request_with_timeout(message, self.default_timeout);
    }

    /// Issue a request with an explicit timeout. Never blocks.
    pub fn request_with_timeout(&self, message: Message, timeout: Duration) {
        self.slot.submit(PendingRequest { message, timeout });
    }
}

/// Connects to a replier and delivers each outcome to a callback.
///
/// The callback receives either the reply or the error that ended the
/// exchange, [`TransportError::Timeout`] included. It runs on the worker
/// task.
pub struct Requester {
    handle: RequestHandle,
    worker: Worker,
}

impl Requester {
    /// Connect with [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint cannot be connected.
    pub async fn connect<B, F>(backend: &B, params: &B::Params, callback: F) -> Result<Self, SyncError>
    where
        B: Backend,
        F: FnMut(Result<Message, TransportError>) + Send + 'static,
    {
        Self::connect_with_timeout(backend, params, DEFAULT_REQUEST_TIMEOUT, callback).await
    }

    /// Connect with a custom default timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint cannot be connected.
    pub async fn connect_with_timeout<B, F>(
        backend: &B,
        params: &B::Params,
        default_timeout: Duration,
        callback: F,
    ) -> Result<Self, SyncError>
    where
        B: Backend,
        F: FnMut(Result<Message, TransportError>) + Send + 'static,
    {
        let socket = backend.open(SocketRole::Requester, params).await?;
        let wait = backend.wait_timeout();
        let slot = Arc::new(RequestSlot::default());
        tracing::debug!(?params, "Requester connected");

        let worker_slot = Arc::clone(&slot);
        let worker = Worker::spawn("requester", move |shutdown| {
            run(socket, worker_slot, wait, callback, shutdown)
        });

        Ok(Self {
            handle: RequestHandle {
                slot,
                default_timeout,
            },
            worker,
        })
    }

    /// Issue a request with the default timeout.
    pub fn request(&self, message: Message) {
        self.handle.request(message);
    }

    /// Issue a request with an explicit timeout.
    pub fn request_with_timeout(&self, message: Message, timeout: Duration) {
        self.handle.request_with_timeout(message, timeout);
    }

    /// A handle usable from other tasks and callbacks.
    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }

    /// Abandon any outstanding request and wait for the worker to exit.
    pub async fn shutdown(self) {
        self.worker.stop().await;
    }
}

enum Exchange {
    Completed(Result<Message, TransportError>),
    Superseded(PendingRequest),
    Shutdown,
}

async fn run<S, F>(
    mut socket: S,
    slot: Arc<RequestSlot>,
    wait: Duration,
    mut callback: F,
    mut shutdown: ShutdownSignal,
) where
    S: Socket,
    F: FnMut(Result<Message, TransportError>) + Send,
{
    let mut next = None;
    loop {
        let request = match next.take() {
            Some(request) => request,
            None => tokio::select! {
                biased;
                () = shutdown.wait() => return,
                request = slot.next() => request,
            },
        };

        match exchange(&mut socket, &slot, request, wait, &mut shutdown).await {
            Exchange::Completed(outcome) => callback(outcome),
            Exchange::Superseded(request) => {
                tracing::debug!("Outstanding request pre-empted");
                next = Some(request);
            }
            Exchange::Shutdown => return,
        }
    }
}

async fn exchange<S: Socket>(
    socket: &mut S,
    slot: &RequestSlot,
    request: PendingRequest,
    wait: Duration,
    shutdown: &mut ShutdownSignal,
) -> Exchange {
    let PendingRequest { message, timeout } = request;
    if let Err(err) = socket.send(message).await {
        return Exchange::Completed(Err(err));
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Exchange::Completed(Err(TransportError::Timeout));
        }

        tokio::select! {
            biased;
            () = shutdown.wait() => return Exchange::Shutdown,
            request = slot.next() => return Exchange::Superseded(request),
            received = socket.receive(remaining.min(wait)) => match received {
                Ok(Some(reply)) => return Exchange::Completed(Ok(reply)),
                Ok(None) => {}
                Err(err) => return Exchange::Completed(Err(err)),
            },
        }
    }
}
