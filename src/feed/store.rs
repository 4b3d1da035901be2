//! Feed merge store.

use super::types::{FeedEvent, FeedScope};
use crate::connection::ConnectionStatus;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Default)]
struct FeedState {
    scope: FeedScope,
    events: HashMap<String, FeedEvent>,
    /// Display order, rebuilt after every mutation.
    ordered: Arc<Vec<FeedEvent>>,
    /// Length of the high-priority prefix of `ordered`.
    high_priority: usize,
    dismissed: HashSet<String>,
    cursor: Option<String>,
    loading: bool,
    connection: ConnectionStatus,
    error: Option<String>,
    revision: u64,
    /// Push writes seen since the first page was requested, by id.
    /// `None` marks a removal.
    since_request: Option<HashMap<String, Option<FeedEvent>>>,
}

impl FeedState {
    fn is_high_priority(&self, event: &FeedEvent) -> bool {
        event.action_required && !self.dismissed.contains(&event.id)
    }

    fn reorder(&mut self) {
        let mut ordered: Vec<&FeedEvent> = self.events.values().collect();
        ordered.sort_by(|a, b| {
            self.is_high_priority(b)
                .cmp(&self.is_high_priority(a))
                .then_with(|| display_order(a, b))
        });
        self.high_priority = ordered
            .iter()
            .take_while(|e| self.is_high_priority(e))
            .count();
        self.ordered = Arc::new(ordered.into_iter().cloned().collect());
        self.revision += 1;
    }

    fn record(&mut self, id: &str, event: Option<&FeedEvent>) {
        if let Some(journal) = self.since_request.as_mut() {
            journal.insert(id.to_string(), event.cloned());
        }
    }

    fn insert_all(&mut self, events: Vec<FeedEvent>) {
        for event in events {
            self.events.insert(event.id.clone(), event);
        }
    }

    fn reset(&mut self, scope: FeedScope) {
        let revision = self.revision;
        *self = FeedState {
            scope,
            revision,
            ..FeedState::default()
        };
        self.reorder();
    }
}

/// Newest first; equal timestamps by higher urgency, then by id.
fn display_order(a: &FeedEvent, b: &FeedEvent) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.urgency.cmp(&a.urgency))
        .then_with(|| a.id.cmp(&b.id))
}

/// Read-only handle on a feed.
///
/// Clones share the same state; every read sees the latest committed write.
#[derive(Clone)]
pub struct FeedView {
    inner: Arc<RwLock<FeedState>>,
}

impl FeedView {
    /// All events in display order. The returned `Arc` is replaced, never
    /// modified, when the feed changes.
    pub fn visible(&self) -> Arc<Vec<FeedEvent>> {
        Arc::clone(&self.inner.read().ordered)
    }

    /// Action-required events that have not been dismissed.
    pub fn high_priority(&self) -> Vec<FeedEvent> {
        let state = self.inner.read();
        state.ordered[..state.high_priority].to_vec()
    }

    pub fn high_priority_count(&self) -> usize {
        self.inner.read().high_priority
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<FeedEvent> {
        self.inner.read().events.get(id).cloned()
    }

    /// Cursor for the next page, if the server reported one.
    pub fn cursor(&self) -> Option<String> {
        self.inner.read().cursor.clone()
    }

    pub fn has_more(&self) -> bool {
        self.inner.read().cursor.is_some()
    }

    pub fn scope(&self) -> FeedScope {
        self.inner.read().scope.clone()
    }

    /// Status of the push half.
    pub fn connection(&self) -> ConnectionStatus {
        self.inner.read().connection
    }

    /// First page requested and not yet answered.
    pub fn is_loading(&self) -> bool {
        self.inner.read().loading
    }

    /// Last pull failure, cleared by the next successful page.
    pub fn error(&self) -> Option<String> {
        self.inner.read().error.clone()
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.inner.read().dismissed.contains(id)
    }

    /// Bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }
}

/// Writable handle on a feed. Reads go through [`FeedView`].
pub struct FeedStore {
    view: FeedView,
}

impl FeedStore {
    pub fn new(scope: FeedScope) -> Self {
        let mut state = FeedState {
            scope,
            ..FeedState::default()
        };
        state.reorder();
        Self {
            view: FeedView {
                inner: Arc::new(RwLock::new(state)),
            },
        }
    }

    /// A read-only handle for consumers.
    pub fn view(&self) -> FeedView {
        self.view.clone()
    }

    /// Second writer on the same state, for the push listener.
    pub(crate) fn share(&self) -> FeedStore {
        FeedStore {
            view: self.view.clone(),
        }
    }

    /// Start recording push writes so the next [`replace`](Self::replace)
    /// can re-apply them over a page that may predate them. Calling it
    /// again before the page lands keeps what was already recorded.
    pub fn begin_refresh(&self) {
        let mut state = self.view.inner.write();
        state.since_request.get_or_insert_with(HashMap::new);
    }

    /// Install the first page. Previous events are discarded; dismissals
    /// are kept. Push writes recorded since [`begin_refresh`](Self::begin_refresh)
    /// are applied on top, since they are newer than the page's request.
    pub fn replace(&self, events: Vec<FeedEvent>, cursor: Option<String>) {
        let mut state = self.view.inner.write();
        let count = events.len();
        state.events.clear();
        state.insert_all(events);
        let replayed = state.since_request.take().unwrap_or_default();
        let newer = replayed.len();
        for (id, event) in replayed {
            match event {
                Some(event) => {
                    state.events.insert(id, event);
                }
                None => {
                    state.events.remove(&id);
                    state.dismissed.remove(&id);
                }
            }
        }
        state.cursor = cursor;
        state.reorder();
        debug!(scope = %state.scope, count, newer, "feed page replaced");
    }

    /// Merge a later page. Existing ids are overwritten.
    pub fn append(&self, events: Vec<FeedEvent>, cursor: Option<String>) {
        let mut state = self.view.inner.write();
        let count = events.len();
        state.insert_all(events);
        state.cursor = cursor;
        state.reorder();
        debug!(scope = %state.scope, count, total = state.events.len(), "feed page appended");
    }

    /// Insert or overwrite one event.
    pub fn upsert(&self, event: FeedEvent) {
        let mut state = self.view.inner.write();
        trace!(id = %event.id, "feed upsert");
        state.record(&event.id, Some(&event));
        state.events.insert(event.id.clone(), event);
        state.reorder();
    }

    /// Remove an event and forget its dismissal. Returns false if absent.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.view.inner.write();
        state.record(id, None);
        let dismissed = state.dismissed.remove(id);
        let removed = state.events.remove(id).is_some();
        if removed || dismissed {
            state.reorder();
        }
        removed
    }

    /// Demote an event out of the high-priority group. Returns false if
    /// the event is unknown or already dismissed.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut state = self.view.inner.write();
        if !state.events.contains_key(id) || !state.dismissed.insert(id.to_string()) {
            return false;
        }
        state.reorder();
        true
    }

    /// Switch scope. Everything scope-specific is dropped.
    pub fn set_filter(&self, scope: FeedScope) {
        let mut state = self.view.inner.write();
        debug!(from = %state.scope, to = %scope, "feed filter changed");
        state.reset(scope);
    }

    /// Drop all events and status, keeping the scope.
    pub fn clear(&self) {
        let mut state = self.view.inner.write();
        let scope = state.scope.clone();
        state.reset(scope);
    }

    pub fn set_connection(&self, status: ConnectionStatus) {
        let mut state = self.view.inner.write();
        state.connection = status;
        state.revision += 1;
    }

    pub fn set_loading(&self, loading: bool) {
        let mut state = self.view.inner.write();
        state.loading = loading;
        state.revision += 1;
    }

    pub fn set_error(&self, error: Option<String>) {
        let mut state = self.view.inner.write();
        state.error = error;
        state.revision += 1;
    }
}

impl Deref for FeedStore {
    type Target = FeedView;

    fn deref(&self) -> &FeedView {
        &self.view
    }
}

impl Default for FeedStore {
    fn default() -> Self {
        Self::new(FeedScope::default())
    }
}
