//! # syncer Core
//!
//! Document model and patch routing for versioned state replication.
//!
//! This crate provides:
//! - RFC 6902 JSON patches (`add`, `remove`, `replace`) with diff and apply
//! - Versioned documents carrying a reserved version member
//! - A router dispatching patch operations to path-matched typed callbacks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod patch;
pub mod router;

pub use document::{DocumentError, VersionedDocument, VERSION_KEY, VERSION_PATH};
pub use patch::{Patch, PatchError, PatchOp, PatchOperation};
pub use router::{PatchOpRouter, PatchOpSet, RouterError};
