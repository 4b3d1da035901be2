//! Feed bridge: pull pages plus push deltas into one [`FeedStore`].

use super::source::{FeedSource, PageOutcome, PageReply, PageRequest};
use super::earliest;
use crate::config::{FeedConfig, SyncConfig};
use crate::connection::{
    ConnectionStatus, ConnectionSupervisor, Connector, SessionHandle, SessionListener,
};
use crate::feed::{FeedChange, FeedScope, FeedStore, FeedUpdate, FeedView};
use crate::schedule::{SharedClock, Timer};
use crate::types::{Endpoint, Generation, TargetId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Writes push frames into the store.
struct FeedPushListener {
    store: FeedStore,
}

impl SessionListener for FeedPushListener {
    fn on_message(&mut self, text: &str) {
        match FeedUpdate::decode(text).and_then(FeedUpdate::into_change) {
            Ok(FeedChange::Upsert(event)) => self.store.upsert(event),
            Ok(FeedChange::Remove(id)) => {
                self.store.remove(&id);
            }
            Err(e) => warn!(error = %e, "dropping feed frame"),
        }
    }

    fn on_state_change(&mut self, status: &ConnectionStatus) {
        self.store.set_connection(*status);
    }
}

/// Drives one feed for the currently selected target.
///
/// Enabling the bridge with a target requests the first page and opens
/// the push session. Disabling it, or switching target, tears both down:
/// the epoch advances, so page replies still in flight are discarded when
/// they arrive, and the push listener is dropped with its session.
///
/// Like every component here it does nothing on its own; call
/// [`poll`](Self::poll) when woken or when
/// [`next_deadline`](Self::next_deadline) passes.
pub struct FeedBridge<C: Connector, S: FeedSource> {
    config: FeedConfig,
    endpoint_template: String,
    clock: SharedClock,
    supervisor: ConnectionSupervisor<C>,
    source: S,
    store: FeedStore,
    target: Option<TargetId>,
    enabled: bool,
    scope: FeedScope,
    epoch: Generation,
    tx: Sender<PageOutcome>,
    rx: Receiver<PageOutcome>,
    in_flight: Option<PageRequest>,
    retry: Timer,
    retry_request: Option<PageRequest>,
    failures: u32,
    session: Option<SessionHandle>,
}

impl<C: Connector, S: FeedSource> FeedBridge<C, S> {
    pub fn new(config: &SyncConfig, connector: C, source: S, clock: SharedClock) -> Self {
        let (tx, rx) = unbounded();
        let scope = FeedScope::new(config.feed.default_scope.clone());
        Self {
            config: config.feed.clone(),
            endpoint_template: config.endpoints.feed.clone(),
            supervisor: ConnectionSupervisor::new(connector, &config.backoff, clock.clone()),
            clock,
            source,
            store: FeedStore::new(scope.clone()),
            target: None,
            enabled: true,
            scope,
            epoch: Generation::default(),
            tx,
            rx,
            in_flight: None,
            retry: Timer::new(),
            retry_request: None,
            failures: 0,
            session: None,
        }
    }

    /// Select the feed's target. `None` deactivates.
    pub fn set_target(&mut self, target: Option<TargetId>) {
        if self.target == target {
            return;
        }
        self.target = target;
        self.reconcile();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.reconcile();
    }

    /// Change scope. The store is reset and, if active, both halves restart
    /// for the new scope.
    pub fn set_filter(&mut self, scope: FeedScope) {
        if self.scope == scope {
            return;
        }
        self.scope = scope.clone();
        self.teardown();
        self.store.set_filter(scope);
        if let Some(target) = self.active_target() {
            self.start(target);
        }
    }

    /// Request the next page. No-op without a cursor, or while a page
    /// request is outstanding.
    pub fn load_more(&mut self) {
        let Some(target) = self.active_target() else {
            return;
        };
        let Some(cursor) = self.store.cursor() else {
            return;
        };
        if self.in_flight.is_some() || self.retry.is_armed() {
            trace!(cursor = %cursor, "page request already outstanding");
            return;
        }
        let request = self.page_request(target, Some(cursor));
        self.request(request);
    }

    /// Demote an event out of the high-priority group.
    pub fn dismiss(&mut self, id: &str) -> bool {
        self.store.dismiss(id)
    }

    pub fn has_more(&self) -> bool {
        self.store.has_more()
    }

    /// A later page is being fetched, or waits on a retry after failing.
    pub fn is_fetching_more(&self) -> bool {
        self.in_flight
            .iter()
            .chain(self.retry_request.iter())
            .any(|r| !r.is_first_page())
    }

    /// Read handle on the current store. A target change installs a new
    /// store, so take a fresh view after calling [`set_target`](Self::set_target).
    pub fn view(&self) -> FeedView {
        self.store.view()
    }

    pub fn target(&self) -> Option<&TargetId> {
        self.target.as_ref()
    }

    pub fn scope(&self) -> &FeedScope {
        &self.scope
    }

    pub fn is_active(&self) -> bool {
        self.active_target().is_some()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Deliver push frames and page replies, and run a due pull retry.
    ///
    /// Returns the number of push events plus page replies applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = self.supervisor.poll();

        while let Ok(outcome) = self.rx.try_recv() {
            if outcome.epoch != self.epoch {
                trace!(
                    epoch = ?outcome.epoch,
                    current = ?self.epoch,
                    "dropping page reply from previous epoch"
                );
                continue;
            }
            if self.in_flight.as_ref() != Some(&outcome.request) {
                trace!(cursor = ?outcome.request.cursor, "dropping unexpected page reply");
                continue;
            }
            applied += 1;
            self.in_flight = None;
            self.handle_page(outcome);
        }

        if self.retry.fire(self.clock.now(), self.epoch) {
            if let Some(request) = self.retry_request.take() {
                debug!(cursor = ?request.cursor, attempt = self.failures, "retrying page request");
                self.request(request);
            }
        }

        applied
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(self.supervisor.next_deadline(), self.retry.deadline())
    }

    fn handle_page(&mut self, outcome: PageOutcome) {
        let first_page = outcome.request.is_first_page();
        match outcome.result {
            Ok(page) => {
                self.failures = 0;
                if first_page {
                    self.store.replace(page.events, page.next_cursor);
                } else {
                    self.store.append(page.events, page.next_cursor);
                }
                self.store.set_error(None);
                self.store.set_loading(false);
            }
            Err(e) => {
                self.failures += 1;
                warn!(error = %e, cursor = ?outcome.request.cursor, failures = self.failures, "page request failed");
                self.store.set_error(Some(e.to_string()));
                self.store.set_loading(false);

                if self.failures <= self.config.pull_retry_attempts {
                    let at = self.clock.now() + self.config.pull_retry_delay;
                    self.retry.arm(at, self.epoch);
                    self.retry_request = Some(outcome.request);
                }
            }
        }
    }

    fn active_target(&self) -> Option<TargetId> {
        if self.enabled {
            self.target.clone()
        } else {
            None
        }
    }

    fn reconcile(&mut self) {
        self.teardown();
        if let Some(target) = self.active_target() {
            self.store = FeedStore::new(self.scope.clone());
            self.start(target);
        }
    }

    fn start(&mut self, target: TargetId) {
        debug!(target_id = %target, scope = %self.scope, "feed bridge starting");
        self.store.set_loading(true);
        let request = self.page_request(target.clone(), None);
        self.request(request);

        let endpoint = Endpoint::from_template(&self.endpoint_template, &target)
            .with_param("scope", self.scope.as_str());
        let listener = FeedPushListener {
            store: self.store.share(),
        };
        self.session = Some(self.supervisor.open(endpoint, listener));
    }

    /// Invalidate everything belonging to the current epoch.
    fn teardown(&mut self) {
        self.epoch = self.epoch.next();
        if let Some(handle) = self.session.take() {
            self.supervisor.close(handle);
        }
        self.in_flight = None;
        self.retry.cancel();
        self.retry_request = None;
        self.failures = 0;
    }

    fn page_request(&self, target: TargetId, cursor: Option<String>) -> PageRequest {
        PageRequest {
            target,
            scope: self.scope.clone(),
            cursor,
            limit: self.config.page_size,
        }
    }

    fn request(&mut self, request: PageRequest) {
        trace!(cursor = ?request.cursor, epoch = ?self.epoch, "requesting page");
        if request.is_first_page() {
            self.store.begin_refresh();
        }
        self.in_flight = Some(request.clone());
        let reply = PageReply::new(self.epoch, request.clone(), self.tx.clone());
        self.source.fetch(request, reply);
    }
}

impl<C: Connector, S: FeedSource> Drop for FeedBridge<C, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
