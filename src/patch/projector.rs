//! Patch document projector.

use super::operations::{apply_operation, operation_effect};
use super::types::{JsonPointer, PatchOp, RawPatchOp};
use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Immutable view of a projected document.
///
/// Cheap to clone. A snapshot never changes after it has been handed out;
/// the next change produces a new one. Compare with [`Snapshot::ptr_eq`] to
/// skip redundant work.
#[derive(Clone)]
pub struct Snapshot {
    doc: Arc<Value>,
    version: u64,
}

impl Snapshot {
    pub fn value(&self) -> &Value {
        &self.doc
    }

    /// Incremented on every change within one projector.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.doc, &other.doc)
    }

    /// Look up a node by JSON pointer.
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        if path == "/" {
            return Some(&self.doc);
        }
        self.doc.pointer(path)
    }

    /// Deserialize the whole document.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&*self.doc).map_err(|e| SyncError::Deserialization(e.to_string()))
    }

    /// Deserialize a keyed collection such as `/tasks` into id -> item.
    ///
    /// A missing collection is empty.
    pub fn collection<T: DeserializeOwned>(&self, path: &str) -> Result<BTreeMap<String, T>> {
        match self.pointer(path) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    T::deserialize(v)
                        .map(|item| (k.clone(), item))
                        .map_err(|e| SyncError::Deserialization(format!("{}/{}: {}", path, k, e)))
                })
                .collect(),
            Some(_) => Err(SyncError::Deserialization(format!(
                "{} is not an object",
                path
            ))),
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("doc", &self.doc)
            .finish()
    }
}

/// Maintains one authoritative document for a stream session.
pub struct Projector {
    factory: Box<dyn Fn() -> Value + Send + Sync>,
    doc: Arc<Value>,
    version: u64,
    /// Any operation accepted this session.
    produced: bool,
    error: Option<String>,
    dropped: u64,
}

impl Projector {
    /// Create a projector. `initial` builds the empty document, and is
    /// called again on every [`reset`](Projector::reset).
    pub fn new<F>(initial: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let doc = Arc::new(initial());
        Self {
            factory: Box::new(initial),
            doc,
            version: 0,
            produced: false,
            error: None,
            dropped: 0,
        }
    }

    /// Projector whose document starts as `{ <collection>: {} }`.
    pub fn keyed(collection: &str) -> Self {
        let key = collection.to_string();
        Self::new(move || {
            let mut map = serde_json::Map::new();
            map.insert(key.clone(), Value::Object(serde_json::Map::new()));
            Value::Object(map)
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            doc: Arc::clone(&self.doc),
            version: self.version,
        }
    }

    /// Apply one operation and return the resulting snapshot.
    ///
    /// Operations that cannot be applied are logged and dropped; the
    /// previous snapshot is returned unchanged.
    pub fn apply(&mut self, operation: PatchOp) -> Snapshot {
        self.apply_one(operation);
        self.snapshot()
    }

    /// Apply a frame's worth of operations, in order.
    pub fn apply_all<I>(&mut self, operations: I) -> Snapshot
    where
        I: IntoIterator<Item = PatchOp>,
    {
        for operation in operations {
            self.apply_one(operation);
        }
        self.snapshot()
    }

    /// Decode and apply wire operations. Undecodable ones are dropped.
    pub fn apply_raw<I>(&mut self, operations: I) -> Snapshot
    where
        I: IntoIterator<Item = RawPatchOp>,
    {
        for raw in operations {
            match PatchOp::from_raw(raw) {
                Ok(operation) => self.apply_one(operation),
                Err(e) => {
                    self.dropped += 1;
                    warn!(error = %e, "dropping undecodable patch operation");
                }
            }
        }
        self.snapshot()
    }

    fn apply_one(&mut self, operation: PatchOp) {
        match operation_effect(&self.doc, &operation) {
            Ok(false) => {
                self.produced = true;
            }
            Ok(true) => {
                let kind = operation.kind();
                // Clones the tree only if a consumer still holds the old snapshot.
                let doc = Arc::make_mut(&mut self.doc);
                if let Err(e) = apply_operation(doc, operation) {
                    self.dropped += 1;
                    warn!(error = %e, kind, "patch operation failed after validation");
                    return;
                }
                self.version += 1;
                self.produced = true;
                self.error = None;
            }
            Err(e) => {
                self.dropped += 1;
                warn!(error = %e, kind = operation.kind(), path = %path_of(&operation), "dropping patch operation");
            }
        }
    }

    /// No snapshot produced yet this session, and no error recorded.
    pub fn is_loading(&self) -> bool {
        !self.produced && self.error.is_none()
    }

    /// Whether any operation has been applied this session.
    pub fn has_data(&self) -> bool {
        self.produced
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Operations dropped so far this session.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Start a new session from the initial document.
    pub fn reset(&mut self) {
        debug!(version = self.version, "projector reset");
        self.doc = Arc::new((self.factory)());
        self.version += 1;
        self.produced = false;
        self.error = None;
        self.dropped = 0;
    }
}

fn path_of(operation: &PatchOp) -> String {
    match operation {
        PatchOp::ReplaceRoot(_) => JsonPointer::root().to_string(),
        PatchOp::Add { path, .. } | PatchOp::Replace { path, .. } | PatchOp::Remove { path } => {
            path.to_string()
        }
    }
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector")
            .field("version", &self.version)
            .field("produced", &self.produced)
            .field("error", &self.error)
            .field("dropped", &self.dropped)
            .finish()
    }
}
