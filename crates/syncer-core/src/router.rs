//! Patch operation routing.
//!
//! Routes pair a path pattern and a set of operation kinds with a typed
//! callback. Every operation of a patch is offered to every route in
//! registration order; all matching routes fire.

use crate::document::is_version_op;
use crate::patch::{Patch, PatchOp};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// A set of patch operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PatchOpSet(u8);

impl PatchOpSet {
    /// Matches nothing.
    pub const NONE: Self = Self(0);
    /// `add` only.
    pub const ADD: Self = Self(PatchOp::Add.bit());
    /// `remove` only.
    pub const REMOVE: Self = Self(PatchOp::Remove.bit());
    /// `replace` only.
    pub const REPLACE: Self = Self(PatchOp::Replace.bit());
    /// Any operation kind.
    pub const ANY: Self = Self(PatchOp::Add.bit() | PatchOp::Remove.bit() | PatchOp::Replace.bit());

    /// Check whether `op` is in the set.
    #[must_use]
    pub const fn contains(self, op: PatchOp) -> bool {
        self.0 & op.bit() != 0
    }
}

impl From<PatchOp> for PatchOpSet {
    fn from(op: PatchOp) -> Self {
        Self(op.bit())
    }
}

impl BitOr for PatchOpSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<PatchOp> for PatchOpSet {
    type Output = Self;

    fn bitor(self, rhs: PatchOp) -> Self {
        Self(self.0 | rhs.bit())
    }
}

impl BitOr for PatchOp {
    type Output = PatchOpSet;

    fn bitor(self, rhs: Self) -> PatchOpSet {
        PatchOpSet(self.bit() | rhs.bit())
    }
}

type Handler<T> =
    Arc<dyn Fn(&T, &Captures<'_>, PatchOp, &Value) -> Result<(), serde_json::Error> + Send + Sync>;

struct Route<T> {
    source: String,
    pattern: Regex,
    ops: PatchOpSet,
    handler: Handler<T>,
}

impl<T> Clone for Route<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            pattern: self.pattern.clone(),
            ops: self.ops,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Dispatches patch operations to path-matched callbacks.
///
/// `T` is the application data type handed to callbacks as context. Cloning
/// a router is cheap; callbacks are shared.
pub struct PatchOpRouter<T> {
    routes: Vec<Route<T>>,
}

impl<T> Default for PatchOpRouter<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> Clone for PatchOpRouter<T> {
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
        }
    }
}

impl<T> fmt::Debug for PatchOpRouter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| (&r.source, r.ops)))
            .finish()
    }
}

impl<T> PatchOpRouter<T> {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    ///
    /// `path_re` must match the whole operation path; its capture groups are
    /// passed to the callback. The operation value is decoded into `V`; for
    /// `remove` no decoding happens and the callback receives `None`.
    ///
    /// # Errors
    ///
    /// Returns error if `path_re` is not a valid regular expression.
    pub fn add_callback<V, F>(
        &mut self,
        path_re: &str,
        ops: impl Into<PatchOpSet>,
        callback: F,
    ) -> Result<&mut Self, RouterError>
    where
        V: DeserializeOwned,
        F: Fn(&T, &Captures<'_>, PatchOp, Option<V>) + Send + Sync + 'static,
    {
        let pattern = Regex::new(&format!("^(?:{path_re})$")).map_err(|e| {
            RouterError::InvalidPattern {
                pattern: path_re.to_string(),
                reason: e.to_string(),
            }
        })?;

        let handler: Handler<T> = Arc::new(move |context, captures, op, value| {
            let typed = match op {
                PatchOp::Remove => None,
                PatchOp::Add | PatchOp::Replace => Some(V::deserialize(value)?),
            };
            callback(context, captures, op, typed);
            Ok(())
        });

        self.routes.push(Route {
            source: path_re.to_string(),
            pattern,
            ops: ops.into(),
            handler,
        });
        Ok(self)
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Offer one operation to every route.
    ///
    /// A route whose value decoding fails is logged and skipped; the
    /// remaining routes are still evaluated. Returns the number of callbacks
    /// that fired.
    pub fn handle_op(&self, context: &T, path: &str, op: PatchOp, value: &Value) -> usize {
        let mut fired = 0;
        for route in &self.routes {
            if !route.ops.contains(op) {
                continue;
            }
            let Some(captures) = route.pattern.captures(path) else {
                continue;
            };

            match (route.handler)(context, &captures, op, value) {
                Ok(()) => fired += 1,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        pattern = %route.source,
                        path,
                        %op,
                        "Failed to decode patch operation value"
                    );
                }
            }
        }
        fired
    }

    /// Route every operation of a patch in order.
    ///
    /// The version marker is never routed. Returns the number of callbacks
    /// that fired.
    pub fn handle_patch(&self, context: &T, patch: &Patch) -> usize {
        if self.routes.is_empty() {
            return 0;
        }
        patch
            .iter()
            .filter(|op| !is_version_op(op))
            .map(|op| {
                self.handle_op(
                    context,
                    op.path(),
                    op.kind(),
                    op.value().unwrap_or(&Value::Null),
                )
            })
            .sum()
    }
}

/// Errors for route registration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
    /// Path pattern failed to compile
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::VERSION_PATH;
    use crate::patch::PatchOperation;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    #[derive(Default)]
    struct Data;

    fn op(kind: PatchOp, path: &str, value: Value) -> PatchOperation {
        match kind {
            PatchOp::Add => PatchOperation::Add {
                path: path.to_string(),
                value,
            },
            PatchOp::Remove => PatchOperation::Remove {
                path: path.to_string(),
            },
            PatchOp::Replace => PatchOperation::Replace {
                path: path.to_string(),
                value,
            },
        }
    }

    #[test]
    fn op_set_membership() {
        let set = PatchOp::Add | PatchOp::Remove;
        assert!(set.contains(PatchOp::Add));
        assert!(set.contains(PatchOp::Remove));
        assert!(!set.contains(PatchOp::Replace));
        assert!(PatchOpSet::ANY.contains(PatchOp::Replace));
        assert!(!PatchOpSet::NONE.contains(PatchOp::Add));
    }

    #[test]
    fn captures_and_typed_values() {
        let recorder = Recorder::default();
        let mut router = PatchOpRouter::<Data>::new();

        let rec = recorder.clone();
        router
            .add_callback(r"/ints/(\d+)", PatchOpSet::ADD, move |_, m, op, v: Option<i64>| {
                rec.push(format!("{op} {} {:?}", &m[1], v));
            })
            .unwrap();

        let fired = router.handle_op(&Data, "/ints/3", PatchOp::Add, &json!(42));
        assert_eq!(fired, 1);
        assert_eq!(recorder.take(), ["add 3 Some(42)"]);
    }

    #[test]
    fn pattern_must_match_whole_path() {
        let mut router = PatchOpRouter::<Data>::new();
        router
            .add_callback("/baz", PatchOpSet::ANY, |_, _, _, _: Option<i64>| {})
            .unwrap();

        assert_eq!(router.handle_op(&Data, "/baz/0", PatchOp::Add, &json!(1)), 0);
        assert_eq!(router.handle_op(&Data, "/x/baz", PatchOp::Add, &json!(1)), 0);
        assert_eq!(router.handle_op(&Data, "/baz", PatchOp::Add, &json!(1)), 1);
    }

    #[test]
    fn op_mask_filters() {
        let mut router = PatchOpRouter::<Data>::new();
        router
            .add_callback("/baz", PatchOpSet::REPLACE, |_, _, _, _: Option<i64>| {})
            .unwrap();

        assert_eq!(router.handle_op(&Data, "/baz", PatchOp::Add, &json!(1)), 0);
        assert_eq!(router.handle_op(&Data, "/baz", PatchOp::Replace, &json!(1)), 1);
    }

    #[test]
    fn remove_skips_decoding() {
        let recorder = Recorder::default();
        let mut router = PatchOpRouter::<Data>::new();

        let rec = recorder.clone();
        router
            .add_callback(r"/items/(\w+)", PatchOpSet::REMOVE, move |_, m, _, v: Option<String>| {
                rec.push(format!("{} {}", &m[1], v.is_none()));
            })
            .unwrap();

        router.handle_op(&Data, "/items/key", PatchOp::Remove, &Value::Null);
        assert_eq!(recorder.take(), ["key true"]);
    }

    #[test]
    fn all_matching_routes_fire_in_registration_order() {
        let recorder = Recorder::default();
        let mut router = PatchOpRouter::<Data>::new();

        for name in ["first", "second", "third"] {
            let rec = recorder.clone();
            router
                .add_callback(r"/a/.*", PatchOpSet::ANY, move |_, m, _, _: Option<Value>| {
                    rec.push(format!("{name} {}", &m[0]));
                })
                .unwrap();
        }

        let patch = Patch::from(vec![
            op(PatchOp::Add, "/a/1", json!(1)),
            op(PatchOp::Replace, "/b", json!(2)),
            op(PatchOp::Remove, "/a/2", Value::Null),
        ]);

        assert_eq!(router.handle_patch(&Data, &patch), 6);
        assert_eq!(
            recorder.take(),
            [
                "first /a/1",
                "second /a/1",
                "third /a/1",
                "first /a/2",
                "second /a/2",
                "third /a/2",
            ]
        );
    }

    #[test]
    fn decode_failure_is_isolated_to_its_route() {
        let recorder = Recorder::default();
        let mut router = PatchOpRouter::<Data>::new();

        let rec = recorder.clone();
        router
            .add_callback("/baz", PatchOpSet::ANY, move |_, _, _, _: Option<i64>| {
                rec.push("int".to_string());
            })
            .unwrap();
        let rec = recorder.clone();
        router
            .add_callback("/baz", PatchOpSet::ANY, move |_, _, _, v: Option<String>| {
                rec.push(format!("string {}", v.unwrap_or_default()));
            })
            .unwrap();

        let fired = router.handle_op(&Data, "/baz", PatchOp::Replace, &json!("hello"));
        assert_eq!(fired, 1);
        assert_eq!(recorder.take(), ["string hello"]);
    }

    #[test]
    fn version_marker_is_never_routed() {
        let mut router = PatchOpRouter::<Data>::new();
        router
            .add_callback(".*", PatchOpSet::ANY, |_, _, _, _: Option<Value>| {})
            .unwrap();

        let patch = Patch::from(vec![
            op(PatchOp::Replace, "/baz", json!(2)),
            op(PatchOp::Replace, VERSION_PATH, json!(1)),
        ]);
        assert_eq!(router.handle_patch(&Data, &patch), 1);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut router = PatchOpRouter::<Data>::new();
        let result = router.add_callback("/ints/(", PatchOpSet::ANY, |_, _, _, _: Option<i64>| {});
        assert!(matches!(result, Err(RouterError::InvalidPattern { .. })));
        assert!(router.is_empty());
    }
}
