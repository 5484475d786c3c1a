//! # syncer Protocol
//!
//! Wire messages, the pluggable transport contract, and the topic scheme
//! used by broker-based backends.
//!
//! ## Messages
//!
//! A [`Message`] is an optional subject plus an opaque body. An empty body
//! is the resync sentinel: "query the full state now".
//!
//! ## Transport
//!
//! A [`Backend`] opens [`Socket`]s in one of four roles: publishers and
//! repliers bind, subscribers and requesters connect.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod message;
pub mod topics;
pub mod transport;

pub use message::Message;
pub use topics::{TopicKind, TopicScheme};
pub use transport::{Backend, Socket, SocketRole, TransportError, DEFAULT_WAIT_TIMEOUT};
