//! Authoritative side of state replication.

use crate::error::SyncError;
use crate::publisher::Publisher;
use crate::replier::Replier;
use crate::timer::Timer;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use syncer_core::document::is_version_op;
use syncer_core::{DocumentError, VersionedDocument};
use syncer_proto::{Backend, Message};

struct Committed {
    document: VersionedDocument,
    version: u64,
}

struct Prepared {
    document: VersionedDocument,
    reply: Vec<u8>,
    notification: Vec<u8>,
}

/// Owns the versioned state of `T` and replicates it to clients.
///
/// Full state is served on the request endpoint; every committed change is
/// broadcast as a patch on the publish endpoint. Once the backend's connect
/// period has elapsed after binding, an empty beacon is broadcast so that
/// clients connected before a restart re-request the full state.
pub struct Server<T, B: Backend> {
    committed: Mutex<Committed>,
    reply: Arc<Mutex<Message>>,
    update_lock: tokio::sync::Mutex<()>,
    publisher: Arc<Publisher<B>>,
    replier: Replier,
    beacon: Timer,
    _data: PhantomData<fn() -> T>,
}

impl<T, B> Server<T, B>
where
    T: Serialize + DeserializeOwned,
    B: Backend,
{
    /// Bind the request and publish endpoints with `data` at version 0.
    ///
    /// # Errors
    ///
    /// Returns error if `data` is not a JSON object or an endpoint cannot be
    /// bound.
    pub async fn bind(
        backend: &B,
        rep_params: &B::Params,
        pub_params: &B::Params,
        data: &T,
    ) -> Result<Self, SyncError> {
        let document = VersionedDocument::from_data(data)?.with_version(0);
        let reply = Arc::new(Mutex::new(Message::new(document.to_bytes()?)));

        let publisher = Arc::new(Publisher::bind(backend, pub_params).await?);

        let cached = Arc::clone(&reply);
        let replier = Replier::bind(backend, rep_params, move |_request: &Message| {
            cached.lock().clone()
        })
        .await?;

        let mut beacon = Timer::new();
        let beacon_publisher = Arc::clone(&publisher);
        beacon.set(backend.connect_period(), async move {
            tracing::debug!("Broadcasting resync beacon");
            beacon_publisher.publish(Message::empty()).await;
        });

        tracing::info!(?rep_params, ?pub_params, "Server bound");

        Ok(Self {
            committed: Mutex::new(Committed {
                document,
                version: 0,
            }),
            reply,
            update_lock: tokio::sync::Mutex::new(()),
            publisher,
            replier,
            beacon,
            _data: PhantomData,
        })
    }

    /// Bind both endpoints with the same parameters.
    ///
    /// Suited to broker-based backends where publish and request traffic
    /// share an endpoint name but use distinct topics.
    ///
    /// # Errors
    ///
    /// See [`Server::bind`].
    pub async fn bind_shared(backend: &B, params: &B::Params, data: &T) -> Result<Self, SyncError> {
        Self::bind(backend, params, params, data).await
    }

    /// Commit a new value.
    ///
    /// Returns the new version, or `None` if nothing changed or the value
    /// could not be serialized (logged). Concurrent updates are applied and
    /// broadcast one at a time in version order.
    pub async fn update(&self, data: &T) -> Option<u64> {
        let _serial = self.update_lock.lock().await;

        let (prepared, version) = {
            let committed = self.committed.lock();
            let version = committed.version + 1;
            match prepare(&committed.document, data, version) {
                Ok(Some(prepared)) => (prepared, version),
                Ok(None) => return None,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to serialize update");
                    return None;
                }
            }
        };

        {
            let mut committed = self.committed.lock();
            committed.document = prepared.document;
            committed.version = version;
            *self.reply.lock() = Message::new(prepared.reply);
        }

        self.publisher
            .publish(Message::new(prepared.notification))
            .await;
        tracing::debug!(version, "Committed update");
        Some(version)
    }

    /// The currently committed value.
    ///
    /// # Errors
    ///
    /// Returns error if the document no longer matches `T`.
    pub fn data(&self) -> Result<T, SyncError> {
        Ok(self.committed.lock().document.to_data()?)
    }

    /// The currently committed version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.committed.lock().version
    }

    /// Stop serving requests and cancel a pending beacon.
    pub async fn shutdown(self) {
        self.beacon.shutdown().await;
        self.replier.shutdown().await;
        tracing::info!("Server shut down");
    }
}

fn prepare<T: Serialize>(
    current: &VersionedDocument,
    data: &T,
    version: u64,
) -> Result<Option<Prepared>, DocumentError> {
    let document = VersionedDocument::from_data(data)?.with_version(version);
    let patch = current.diff(&document);
    if patch.iter().all(is_version_op) {
        return Ok(None);
    }

    Ok(Some(Prepared {
        reply: document.to_bytes()?,
        notification: patch.to_bytes()?,
        document,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryParams};
    use serde::Deserialize;
    use std::time::Duration;
    use syncer_core::Patch;
    use syncer_proto::{Socket, SocketRole};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Data {
        baz: i32,
    }

    const WAIT: Duration = Duration::from_millis(200);

    async fn bind(backend: &MemoryBackend, data: &Data) -> Server<Data, MemoryBackend> {
        Server::bind(
            backend,
            &MemoryParams::new("req"),
            &MemoryParams::new("pub"),
            data,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn update_bumps_version_and_broadcasts_patch() {
        let backend = MemoryBackend::new().with_connect_period(Duration::from_secs(60));
        let mut notifications = backend
            .open(SocketRole::Subscriber, &MemoryParams::new("pub"))
            .await
            .unwrap();
        let server = bind(&backend, &Data { baz: 1 }).await;

        assert_eq!(server.update(&Data { baz: 2 }).await, Some(1));
        assert_eq!(server.version(), 1);
        assert_eq!(server.data().unwrap(), Data { baz: 2 });

        let message = notifications.receive(WAIT).await.unwrap().unwrap();
        let patch = Patch::from_bytes(message.body()).unwrap();
        assert_eq!(patch.len(), 2);
        assert_eq!(syncer_core::document::patch_version(&patch), Some(1));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn unchanged_update_is_noop() {
        let backend = MemoryBackend::new().with_connect_period(Duration::from_secs(60));
        let mut notifications = backend
            .open(SocketRole::Subscriber, &MemoryParams::new("pub"))
            .await
            .unwrap();
        let server = bind(&backend, &Data { baz: 1 }).await;

        assert_eq!(server.update(&Data { baz: 1 }).await, None);
        assert_eq!(server.version(), 0);
        assert!(notifications.receive(WAIT).await.unwrap().is_none());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn replies_with_full_state() {
        let backend = MemoryBackend::new();
        let server = bind(&backend, &Data { baz: 3 }).await;
        server.update(&Data { baz: 4 }).await;

        let mut requester = backend
            .open(SocketRole::Requester, &MemoryParams::new("req"))
            .await
            .unwrap();
        requester.send(Message::empty()).await.unwrap();
        let reply = requester.receive(WAIT).await.unwrap().unwrap();

        let document = VersionedDocument::from_bytes(reply.body()).unwrap();
        assert_eq!(document.version(), Some(1));
        assert_eq!(document.to_data::<Data>().unwrap(), Data { baz: 4 });

        server.shutdown().await;
    }

    #[tokio::test]
    async fn beacon_follows_connect_period() {
        let backend = MemoryBackend::new().with_connect_period(Duration::from_millis(20));
        let mut notifications = backend
            .open(SocketRole::Subscriber, &MemoryParams::new("pub"))
            .await
            .unwrap();
        let server = bind(&backend, &Data::default()).await;

        let beacon = notifications.receive(WAIT).await.unwrap().unwrap();
        assert!(beacon.is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn endpoints_are_released_on_shutdown() {
        let backend = MemoryBackend::new();
        let server = bind(&backend, &Data::default()).await;

        let duplicate = Server::<Data, _>::bind(
            &backend,
            &MemoryParams::new("req"),
            &MemoryParams::new("pub"),
            &Data::default(),
        )
        .await;
        assert!(matches!(duplicate, Err(SyncError::Transport(_))));

        server.shutdown().await;
        let again = bind(&backend, &Data::default()).await;
        again.shutdown().await;
    }

    #[test]
    fn non_object_data_rejected() {
        let current = VersionedDocument::default().with_version(0);
        assert!(prepare(&current, &5, 1).is_err());
    }
}
