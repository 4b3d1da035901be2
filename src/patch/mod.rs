//! JSON patch projection.
//!
//! A [`Projector`] owns one document per stream session and turns a stream
//! of [`PatchOp`]s into a sequence of immutable [`Snapshot`]s:
//! - `replace` at the root installs a full snapshot (initial load, reconnect)
//! - `add`/`replace` at a keyed path upsert, leaving siblings alone
//! - `remove` deletes, and is a no-op when the key is already gone
//!
//! Operations that cannot be applied are logged and dropped, never raised.

mod operations;
mod projector;
mod types;

pub use operations::{apply_operation, operation_effect};
pub use projector::{Projector, Snapshot};
pub use types::{JsonPointer, PatchOp, RawPatchOp, StreamFrame};
pub(crate) use types::truncate;
