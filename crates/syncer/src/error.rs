//! Error type for the synchronization layer.

use syncer_core::{DocumentError, RouterError};
use syncer_proto::TransportError;

/// Errors surfaced by servers, clients and messaging primitives.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Transport endpoint could not be opened or used
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Data could not be converted to or from a document
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Route registration failed
    #[error(transparent)]
    Router(#[from] RouterError),
}
