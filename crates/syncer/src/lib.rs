//! # syncer
//!
//! Versioned state replication between one server and many clients.
//!
//! A [`Server`] owns a serializable value. Clients request its full state
//! over request/reply and then follow broadcast JSON patches over
//! publish/subscribe, each tagged with a strictly increasing version. A
//! client that sees a version gap falls back to requesting the full state.
//! Every change a client observes is offered to a [`PatchOpRouter`] that
//! dispatches it to path-matched typed callbacks.
//!
//! ## Transports
//!
//! All endpoints are opened through a [`Backend`]. [`MemoryBackend`]
//! connects endpoints within one process; broker-based backends live in
//! their own crates.
//!
//! ## Messaging primitives
//!
//! [`Publisher`], [`Subscriber`], [`Requester`], [`Replier`] and [`Timer`]
//! are usable on their own. Each runs its receive loop on a Tokio task that
//! is stopped by `shutdown().await` or signalled on drop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod replier;
pub mod requester;
pub mod server;
pub mod subscriber;
pub mod timer;
mod worker;

pub use client::{Client, ClientOptions};
pub use error::SyncError;
pub use memory::{MemoryBackend, MemoryParams};
pub use publisher::Publisher;
pub use replier::Replier;
pub use requester::{RequestHandle, Requester, DEFAULT_REQUEST_TIMEOUT};
pub use server::Server;
pub use subscriber::Subscriber;
pub use timer::Timer;

pub use syncer_core::{Patch, PatchOp, PatchOpRouter, PatchOpSet, VersionedDocument};
pub use syncer_proto::{Backend, Message, Socket, SocketRole, TransportError};
