//! RFC 6902 JSON patches.
//!
//! Only the `add`, `remove` and `replace` operations are produced and
//! understood. Paths are RFC 6901 JSON pointers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Kind of a patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert a value (object member or array element)
    Add = 1,
    /// Remove the value at the path
    Remove = 2,
    /// Replace an existing value
    Replace = 4,
}

impl PatchOp {
    /// Bit used for this kind in a [`crate::PatchOpSet`].
    #[must_use]
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for PatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOp::Add => write!(f, "add"),
            PatchOp::Remove => write!(f, "remove"),
            PatchOp::Replace => write!(f, "replace"),
        }
    }
}

/// A single patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// `{"op": "add", "path": ..., "value": ...}`
    Add {
        /// Target pointer
        path: String,
        /// Inserted value
        value: Value,
    },
    /// `{"op": "remove", "path": ...}`
    Remove {
        /// Target pointer
        path: String,
    },
    /// `{"op": "replace", "path": ..., "value": ...}`
    Replace {
        /// Target pointer
        path: String,
        /// Replacement value
        value: Value,
    },
}

impl PatchOperation {
    /// The operation kind.
    #[must_use]
    pub fn kind(&self) -> PatchOp {
        match self {
            PatchOperation::Add { .. } => PatchOp::Add,
            PatchOperation::Remove { .. } => PatchOp::Remove,
            PatchOperation::Replace { .. } => PatchOp::Replace,
        }
    }

    /// The target pointer.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. } => path,
        }
    }

    /// The carried value, absent for `remove`.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                Some(value)
            }
            PatchOperation::Remove { .. } => None,
        }
    }
}

/// An ordered sequence of patch operations.
///
/// Order is significant: operations are applied and routed left to right.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Vec<PatchOperation>);

impl Patch {
    /// Create an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an operation.
    pub fn push(&mut self, op: PatchOperation) {
        self.0.push(op);
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the patch has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the operations in order.
    pub fn iter(&self) -> std::slice::Iter<'_, PatchOperation> {
        self.0.iter()
    }

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PatchError> {
        serde_json::to_vec(self).map_err(|e| PatchError::Encode(e.to_string()))
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a JSON patch.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PatchError> {
        serde_json::from_slice(bytes).map_err(|e| PatchError::Decode(e.to_string()))
    }
}

impl From<Vec<PatchOperation>> for Patch {
    fn from(ops: Vec<PatchOperation>) -> Self {
        Self(ops)
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = &'a PatchOperation;
    type IntoIter = std::slice::Iter<'a, PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Patch {
    type Item = PatchOperation;
    type IntoIter = std::vec::IntoIter<PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Compute a patch transforming `before` into `after`.
///
/// Objects are compared member by member, arrays element by element over
/// their common prefix; surplus elements are removed from the highest index
/// down and new elements are added at explicit indices.
#[must_use]
pub fn diff(before: &Value, after: &Value) -> Patch {
    let mut patch = Patch::new();
    diff_values(before, after, "", &mut patch);
    patch
}

fn diff_values(before: &Value, after: &Value, path: &str, patch: &mut Patch) {
    if before == after {
        return;
    }

    match (before, after) {
        (Value::Object(old_obj), Value::Object(new_obj)) => {
            for (key, old_val) in old_obj {
                let child_path = format!("{path}/{}", escape_token(key));
                match new_obj.get(key) {
                    Some(new_val) => diff_values(old_val, new_val, &child_path, patch),
                    None => patch.push(PatchOperation::Remove { path: child_path }),
                }
            }

            for (key, new_val) in new_obj {
                if !old_obj.contains_key(key) {
                    patch.push(PatchOperation::Add {
                        path: format!("{path}/{}", escape_token(key)),
                        value: new_val.clone(),
                    });
                }
            }
        }
        (Value::Array(old_arr), Value::Array(new_arr)) => {
            let common = old_arr.len().min(new_arr.len());
            for (i, (old_val, new_val)) in old_arr.iter().zip(new_arr).enumerate() {
                diff_values(old_val, new_val, &format!("{path}/{i}"), patch);
            }

            for i in (common..old_arr.len()).rev() {
                patch.push(PatchOperation::Remove {
                    path: format!("{path}/{i}"),
                });
            }

            for (i, new_val) in new_arr.iter().enumerate().skip(common) {
                patch.push(PatchOperation::Add {
                    path: format!("{path}/{i}"),
                    value: new_val.clone(),
                });
            }
        }
        _ => patch.push(PatchOperation::Replace {
            path: path.to_string(),
            value: after.clone(),
        }),
    }
}

/// Apply a patch to a document.
///
/// Application is atomic: on error the document is left untouched.
///
/// # Errors
///
/// Returns error if any operation targets a missing location or an invalid
/// pointer.
pub fn apply(document: &mut Value, patch: &Patch) -> Result<(), PatchError> {
    let mut patched = document.clone();
    for op in patch {
        apply_operation(&mut patched, op)?;
    }
    *document = patched;
    Ok(())
}

fn apply_operation(doc: &mut Value, op: &PatchOperation) -> Result<(), PatchError> {
    match op {
        PatchOperation::Add { path, value } => apply_add(doc, path, value.clone()),
        PatchOperation::Remove { path } => apply_remove(doc, path),
        PatchOperation::Replace { path, value } => apply_replace(doc, path, value.clone()),
    }
}

fn apply_add(doc: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    let tokens = parse_pointer(path)?;
    let Some((key, parent_tokens)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };

    match resolve_mut(doc, parent_tokens, path)? {
        Value::Object(map) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        Value::Array(arr) => {
            if key == "-" {
                arr.push(value);
                return Ok(());
            }
            let idx = parse_index(key, path)?;
            if idx > arr.len() {
                return Err(PatchError::InvalidIndex(path.to_string()));
            }
            arr.insert(idx, value);
            Ok(())
        }
        _ => Err(PatchError::InvalidTarget(path.to_string())),
    }
}

fn apply_remove(doc: &mut Value, path: &str) -> Result<(), PatchError> {
    let tokens = parse_pointer(path)?;
    let Some((key, parent_tokens)) = tokens.split_last() else {
        return Err(PatchError::InvalidTarget(path.to_string()));
    };

    match resolve_mut(doc, parent_tokens, path)? {
        Value::Object(map) => map
            .remove(key)
            .map(drop)
            .ok_or_else(|| PatchError::NotFound(path.to_string())),
        Value::Array(arr) => {
            let idx = parse_index(key, path)?;
            if idx >= arr.len() {
                return Err(PatchError::NotFound(path.to_string()));
            }
            arr.remove(idx);
            Ok(())
        }
        _ => Err(PatchError::InvalidTarget(path.to_string())),
    }
}

fn apply_replace(doc: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    let tokens = parse_pointer(path)?;
    let target = resolve_mut(doc, &tokens, path)?;
    *target = value;
    Ok(())
}

/// Walk `tokens` down from `doc`; every step must exist.
fn resolve_mut<'a>(
    doc: &'a mut Value,
    tokens: &[String],
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| PatchError::NotFound(path.to_string()))?,
            Value::Array(arr) => {
                let idx = parse_index(token, path)?;
                arr.get_mut(idx)
                    .ok_or_else(|| PatchError::NotFound(path.to_string()))?
            }
            _ => return Err(PatchError::InvalidTarget(path.to_string())),
        };
    }
    Ok(current)
}

/// Split a JSON pointer into unescaped reference tokens.
///
/// # Errors
///
/// Returns error if a non-empty pointer does not start with `/`.
pub fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(path.to_string()));
    };
    Ok(rest.split('/').map(unescape_token).collect())
}

/// Escape a member name for use as a pointer token (`~` → `~0`, `/` → `~1`).
#[must_use]
pub fn escape_token(key: &str) -> Cow<'_, str> {
    if key.contains(|c| c == '~' || c == '/') {
        Cow::Owned(key.replace('~', "~0").replace('/', "~1"))
    } else {
        Cow::Borrowed(key)
    }
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    // no signs or leading zeros
    if token.is_empty()
        || !token.bytes().all(|b| b.is_ascii_digit())
        || (token.len() > 1 && token.starts_with('0'))
    {
        return Err(PatchError::InvalidIndex(path.to_string()));
    }
    token
        .parse()
        .map_err(|_| PatchError::InvalidIndex(path.to_string()))
}

/// Errors for patch encoding and application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// Pointer does not start with `/`
    #[error("invalid pointer: {0}")]
    InvalidPointer(String),
    /// Target location does not exist
    #[error("path not found: {0}")]
    NotFound(String),
    /// Array index is malformed or out of range
    #[error("invalid array index: {0}")]
    InvalidIndex(String),
    /// Parent is neither an object nor an array
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    /// Serialization failed
    #[error("patch serialization failed: {0}")]
    Encode(String),
    /// Deserialization failed
    #[error("patch deserialization failed: {0}")]
    Decode(String),
}
