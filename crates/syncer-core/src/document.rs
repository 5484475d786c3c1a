//! Versioned state documents.
//!
//! A document is the JSON form of the application's data plus one reserved
//! top-level member holding the replication version. The version member is
//! not part of the application type; it is injected before diffing so that
//! every committed change carries a trailing version marker operation.

use crate::patch::{self, Patch, PatchOperation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Reserved member name carrying the version.
pub const VERSION_KEY: &str = "__syncer_data_version";

/// JSON pointer of the reserved version member.
pub const VERSION_PATH: &str = "/__syncer_data_version";

/// Check whether an operation targets the reserved version member.
#[must_use]
pub fn is_version_op(op: &PatchOperation) -> bool {
    op.path() == VERSION_PATH
}

/// Extract the version carried by a patch's version marker.
///
/// The marker is an `add` or `replace` at [`VERSION_PATH`] with an unsigned
/// integer value. Returns `None` if the patch has no usable marker.
#[must_use]
pub fn patch_version(patch: &Patch) -> Option<u64> {
    patch
        .iter()
        .filter(|op| is_version_op(op))
        .find_map(|op| op.value().and_then(Value::as_u64))
}

/// A JSON object document with an optional embedded version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    value: Value,
}

impl Default for VersionedDocument {
    fn default() -> Self {
        Self {
            value: Value::Object(Map::new()),
        }
    }
}

impl VersionedDocument {
    /// Serialize application data into an unversioned document.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails or the data is not a JSON object.
    pub fn from_data<T: Serialize>(data: &T) -> Result<Self, DocumentError> {
        let value =
            serde_json::to_value(data).map_err(|e| DocumentError::Serialize(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap a JSON value.
    ///
    /// # Errors
    ///
    /// Returns error if the value is not a JSON object.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        if value.is_object() {
            Ok(Self { value })
        } else {
            Err(DocumentError::NotAnObject)
        }
    }

    /// Parse a serialized document.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a JSON object.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DocumentError::Deserialize(e.to_string()))?;
        Self::from_value(value)
    }

    /// Serialize the whole document, version included.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        serde_json::to_vec(&self.value).map_err(|e| DocumentError::Serialize(e.to_string()))
    }

    /// Deserialize the application data, ignoring the version member.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not match `T`.
    pub fn to_data<T: DeserializeOwned>(&self) -> Result<T, DocumentError> {
        let mut value = self.value.clone();
        if let Value::Object(map) = &mut value {
            map.remove(VERSION_KEY);
        }
        serde_json::from_value(value).map_err(|e| DocumentError::Deserialize(e.to_string()))
    }

    /// The embedded version, if any.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.value.get(VERSION_KEY).and_then(Value::as_u64)
    }

    /// Set the embedded version.
    pub fn set_version(&mut self, version: u64) {
        if let Value::Object(map) = &mut self.value {
            map.insert(VERSION_KEY.to_string(), Value::from(version));
        }
    }

    /// Builder-style [`Self::set_version`].
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.set_version(version);
        self
    }

    /// Compute the patch transforming this document into `after`.
    #[must_use]
    pub fn diff(&self, after: &Self) -> Patch {
        patch::diff(&self.value, &after.value)
    }

    /// Apply a patch in place.
    ///
    /// # Errors
    ///
    /// Returns error if the patch does not apply or would turn the document
    /// into a non-object. The document is unchanged on error.
    pub fn apply(&mut self, patch: &Patch) -> Result<(), DocumentError> {
        let mut value = self.value.clone();
        patch::apply(&mut value, patch)?;
        self.value = Self::from_value(value)?.value;
        Ok(())
    }

    /// Borrow the underlying JSON value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

/// Errors for document conversion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DocumentError {
    /// Application data does not serialize to a JSON object
    #[error("document root must be a JSON object")]
    NotAnObject,
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// Patch application failed
    #[error(transparent)]
    Patch(#[from] patch::PatchError),
}
