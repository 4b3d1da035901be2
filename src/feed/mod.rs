//! Notification feed merged from a paginated pull source and push deltas.
//!
//! [`FeedStore`] is the single writer; consumers read through [`FeedView`]
//! clones. Events are de-duplicated by id and kept in display order:
//! undismissed action-required events first, then newest first.

mod store;
mod types;

pub use store::{FeedStore, FeedView};
pub use types::{
    CallToAction, FeedChange, FeedChangeKind, FeedEvent, FeedPage, FeedScope, FeedUpdate,
    FEED_UPDATE_TYPE,
};
