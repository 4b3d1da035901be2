//! Consumer-facing orchestrators.
//!
//! Each one binds a target to a push session (and, for the feed, a pull
//! source) and tears everything down when the target changes:
//! - [`FeedBridge`] merges paginated pages and push deltas into a
//!   [`FeedStore`](crate::feed::FeedStore)
//! - [`DocumentStream`] projects keyed patch documents (tasks, diffs)
//! - [`AppendStream`] batches append-only entries (logs, diffs)

mod feed;
mod source;
mod streams;

pub use feed::FeedBridge;
pub use source::{FeedSource, MemoryFeedSource, PageReply, PageRequest};
pub use streams::{AppendStream, DocumentStream, LogStream};

use std::time::Instant;

/// The sooner of two optional deadlines.
pub(crate) fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
