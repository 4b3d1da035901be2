//! # patchwire
//!
//! Client-side live-update synchronization. A server publishes an initial
//! snapshot and a stream of incremental changes; this crate turns that into
//! consistent local state that views can render without tearing.
//!
//! ## Core Concepts
//!
//! - **Sessions**: one supervised push connection per consumer, retried with
//!   capped exponential backoff and silenced on close
//! - **Projection**: JSON Patch frames applied to an immutable, shared
//!   document snapshot
//! - **Batching**: bursty append-only streams flushed at a bounded rate
//! - **Feed**: paginated pull pages and push deltas merged, de-duplicated
//!   and priority-ordered
//!
//! Everything is poll-driven. Components never spawn threads or sleep; the
//! host calls `poll()` when a transport wakes it or `next_deadline()` passes.
//!
//! ## Example
//!
//! ```ignore
//! use patchwire::{LogStream, MemoryConnector, SyncConfig, SystemClock, TargetId};
//!
//! let config = SyncConfig::load("sync.json")?;
//! let mut logs = LogStream::logs(&config, MemoryConnector::new(), SystemClock::shared());
//! logs.set_target(Some(TargetId::new("process-42")));
//!
//! loop {
//!     logs.poll();
//!     for line in logs.entries().iter() {
//!         println!("{}", line.value.content);
//!     }
//!     if logs.is_finished() {
//!         break;
//!     }
//! }
//! ```

pub mod batch;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod patch;
pub mod schedule;
pub mod types;

// Re-exports
pub use batch::{BatchingBuffer, EntryKey, Keyed, LogChannel, LogEntry};
pub use bridge::{
    AppendStream, DocumentStream, FeedBridge, FeedSource, LogStream, MemoryFeedSource, PageReply,
    PageRequest,
};
pub use config::{
    BackoffConfig, BatchConfig, BatchProfiles, FeedConfig, StreamEndpoints, SyncConfig,
};
pub use connection::{
    Backoff, Callbacks, CloseReason, Connection, ConnectionState, ConnectionStatus,
    ConnectionSupervisor, Connector, EventSink, MemoryConnector, MemoryPeer, SessionHandle,
    SessionListener, TransportEvent,
};
pub use error::{Result, SyncError};
pub use feed::{
    CallToAction, FeedChange, FeedChangeKind, FeedEvent, FeedPage, FeedScope, FeedStore,
    FeedUpdate, FeedView,
};
pub use patch::{apply_operation, JsonPointer, PatchOp, Projector, RawPatchOp, Snapshot, StreamFrame};
pub use schedule::{Clock, ManualClock, SharedClock, SystemClock, Timer};
pub use types::{Endpoint, Generation, TargetId};
