//! Replica side of state replication.

use crate::error::SyncError;
use crate::requester::{RequestHandle, Requester, DEFAULT_REQUEST_TIMEOUT};
use crate::subscriber::Subscriber;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use syncer_core::document::patch_version;
use syncer_core::{Patch, PatchOpRouter, VersionedDocument};
use syncer_proto::{Backend, Message, TransportError};

/// Tuning knobs for a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// How long to wait for a full-state reply
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct Replica<T> {
    document: Mutex<VersionedDocument>,
    router: PatchOpRouter<T>,
    requester: OnceLock<RequestHandle>,
}

impl<T> Replica<T>
where
    T: DeserializeOwned,
{
    fn request_full_state(&self) {
        if let Some(requester) = self.requester.get() {
            requester.request(Message::empty());
        }
    }

    fn on_reply(&self, reply: Result<Message, TransportError>) {
        let message = match reply {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "Full state request failed");
                return;
            }
        };

        let incoming = match VersionedDocument::from_bytes(message.body()) {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed full state");
                return;
            }
        };
        let Some(version) = incoming.version() else {
            tracing::warn!("Dropping full state without version");
            return;
        };

        let mut document = self.document.lock();
        let previous = document.version();
        let patch = document.diff(&incoming);
        self.route(&document, &patch);
        *document = incoming;
        drop(document);
        tracing::debug!(version, ops = patch.len(), "Synchronized full state");

        // Either overtaken by a newer patch or the server restarted; ask
        // again to tell the two apart.
        if previous.is_some_and(|previous| version < previous) {
            tracing::debug!(version, ?previous, "Full state older than replica, requesting again");
            self.request_full_state();
        }
    }

    fn on_notification(&self, message: &Message) {
        if message.is_empty() {
            tracing::debug!("Resync beacon received");
            self.request_full_state();
            return;
        }

        let patch = match Patch::from_bytes(message.body()) {
            Ok(patch) => patch,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed patch");
                return;
            }
        };
        let Some(version) = patch_version(&patch) else {
            tracing::warn!("Dropping patch without version marker");
            return;
        };

        let mut document = self.document.lock();
        let expected = document.version().map(|v| v + 1);
        if expected != Some(version) {
            drop(document);
            tracing::info!(version, ?expected, "Version gap, requesting full state");
            self.request_full_state();
            return;
        }

        let mut next = document.clone();
        if let Err(err) = next.apply(&patch) {
            drop(document);
            tracing::warn!(error = %err, version, "Patch does not apply, requesting full state");
            self.request_full_state();
            return;
        }

        self.route(&document, &patch);
        *document = next;
        tracing::trace!(version, "Applied patch");
    }

    /// Offer a patch to the router with the pre-change data as context.
    fn route(&self, document: &VersionedDocument, patch: &Patch) {
        if self.router.is_empty() {
            return;
        }
        match document.to_data::<T>() {
            Ok(context) => {
                self.router.handle_patch(&context, patch);
            }
            Err(err) => tracing::warn!(error = %err, "Failed to decode routing context"),
        }
    }
}

/// Maintains a replica of a [`Server`](crate::Server)'s state.
///
/// The client starts unsynchronized with `T::default()` as its baseline and
/// immediately requests the full state. Afterwards it applies broadcast
/// patches whose version directly follows its own and falls back to a
/// full-state request on any gap, malformed patch or resync beacon. Every
/// change, whether from a patch or a full-state reply, is offered to the
/// router before it becomes visible through [`Client::data`].
///
/// Router callbacks run on the client's background tasks while the document
/// lock is held. They must not call back into the same client.
pub struct Client<T> {
    replica: Arc<Replica<T>>,
    requester: Requester,
    subscriber: Subscriber,
}

impl<T> Client<T>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    /// Connect to a server's request and publish endpoints.
    ///
    /// # Errors
    ///
    /// Returns error if `T::default()` is not a JSON object or an endpoint
    /// cannot be connected.
    pub async fn connect<B: Backend>(
        backend: &B,
        req_params: &B::Params,
        sub_params: &B::Params,
        router: PatchOpRouter<T>,
    ) -> Result<Self, SyncError> {
        Self::connect_with_options(backend, req_params, sub_params, router, ClientOptions::default())
            .await
    }

    /// Connect with explicit options.
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub async fn connect_with_options<B: Backend>(
        backend: &B,
        req_params: &B::Params,
        sub_params: &B::Params,
        router: PatchOpRouter<T>,
        options: ClientOptions,
    ) -> Result<Self, SyncError> {
        let baseline = VersionedDocument::from_data(&T::default())?;
        let replica = Arc::new(Replica {
            document: Mutex::new(baseline),
            router,
            requester: OnceLock::new(),
        });

        let on_reply = Arc::clone(&replica);
        let requester =
            Requester::connect_with_timeout(backend, req_params, options.request_timeout, move |reply| {
                on_reply.on_reply(reply);
            })
            .await?;

        let _ = replica.requester.set(requester.handle());

        let on_notification = Arc::clone(&replica);
        let subscriber = Subscriber::connect(backend, sub_params, move |message: Message| {
            on_notification.on_notification(&message);
        })
        .await?;

        requester.request(Message::empty());
        tracing::info!(?req_params, ?sub_params, "Client connected");

        Ok(Self {
            replica,
            requester,
            subscriber,
        })
    }

    /// Connect to a server bound with [`Server::bind_shared`](crate::Server::bind_shared).
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub async fn connect_shared<B: Backend>(
        backend: &B,
        params: &B::Params,
        router: PatchOpRouter<T>,
    ) -> Result<Self, SyncError> {
        Self::connect(backend, params, params, router).await
    }

    /// The replicated value; `T::default()` until the first sync.
    ///
    /// # Errors
    ///
    /// Returns error if the replicated document does not match `T`.
    pub fn data(&self) -> Result<T, SyncError> {
        Ok(self.replica.document.lock().to_data()?)
    }

    /// The replicated version, or `None` while unsynchronized.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.replica.document.lock().version()
    }

    /// Check whether at least one full state has been received.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.version().is_some()
    }

    /// Request the full state now.
    pub fn resync(&self) {
        self.requester.request(Message::empty());
    }

    /// Stop both background tasks and wait for them to exit.
    pub async fn shutdown(self) {
        self.subscriber.shutdown().await;
        self.requester.shutdown().await;
        tracing::info!("Client shut down");
    }
}
