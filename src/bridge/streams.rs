//! Patch stream orchestrators: keyed documents and append-only entries.

use super::earliest;
use crate::batch::{BatchingBuffer, Keyed, LogEntry};
use crate::config::{BackoffConfig, BatchConfig, SyncConfig};
use crate::connection::{
    ConnectionState, ConnectionStatus, ConnectionSupervisor, Connector, SessionHandle,
    SessionListener,
};
use crate::patch::{Projector, Snapshot, StreamFrame};
use crate::schedule::SharedClock;
use crate::types::{Endpoint, TargetId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Recorded when a session fails before delivering anything.
const CONNECTION_FAILED: &str = "connection failed";

struct DocumentShared {
    projector: Projector,
    status: ConnectionStatus,
    finished: bool,
}

struct DocumentListener {
    shared: Arc<Mutex<DocumentShared>>,
}

impl SessionListener for DocumentListener {
    fn on_message(&mut self, text: &str) {
        let mut shared = self.shared.lock();
        match StreamFrame::decode(text) {
            Ok(StreamFrame::Patch(ops)) => {
                shared.projector.apply_raw(ops);
            }
            Ok(StreamFrame::Finished) => shared.finished = true,
            Err(e) => warn!(error = %e, "dropping document frame"),
        }
    }

    fn on_state_change(&mut self, status: &ConnectionStatus) {
        let mut shared = self.shared.lock();
        shared.status = *status;
        match status.state {
            ConnectionState::Reconnecting if !shared.projector.has_data() => {
                shared.projector.record_error(CONNECTION_FAILED);
            }
            ConnectionState::Connected => shared.projector.clear_error(),
            _ => {}
        }
    }
}

/// A keyed document kept current by a push stream.
///
/// Task lists and keyed diff maps are both documents: an initial
/// `ReplaceRoot` followed by upserts and removals under one collection.
/// Reconnects keep the last snapshot; only a target change resets it.
pub struct DocumentStream<C: Connector> {
    endpoint_template: String,
    supervisor: ConnectionSupervisor<C>,
    shared: Arc<Mutex<DocumentShared>>,
    target: Option<TargetId>,
    session: Option<SessionHandle>,
}

impl<C: Connector> DocumentStream<C> {
    pub fn new(
        endpoint_template: impl Into<String>,
        connector: C,
        backoff: &BackoffConfig,
        clock: SharedClock,
        projector: Projector,
    ) -> Self {
        Self {
            endpoint_template: endpoint_template.into(),
            supervisor: ConnectionSupervisor::new(connector, backoff, clock),
            shared: Arc::new(Mutex::new(DocumentShared {
                projector,
                status: ConnectionStatus::idle(),
                finished: false,
            })),
            target: None,
            session: None,
        }
    }

    /// Task document: `{ "tasks": { <id>: task } }`.
    pub fn tasks(config: &SyncConfig, connector: C, clock: SharedClock) -> Self {
        Self::new(
            config.endpoints.tasks.clone(),
            connector,
            &config.backoff,
            clock,
            Projector::keyed("tasks"),
        )
    }

    /// Keyed diff document: `{ "entries": { <key>: entry } }`.
    pub fn diffs(config: &SyncConfig, connector: C, clock: SharedClock) -> Self {
        Self::new(
            config.endpoints.diffs.clone(),
            connector,
            &config.backoff,
            clock,
            Projector::keyed("entries"),
        )
    }

    /// Follow `target`, or stop with `None`. The document restarts empty.
    pub fn set_target(&mut self, target: Option<TargetId>) {
        if self.target == target {
            return;
        }
        if let Some(handle) = self.session.take() {
            self.supervisor.close(handle);
        }
        {
            let mut shared = self.shared.lock();
            shared.projector.reset();
            shared.status = ConnectionStatus::idle();
            shared.finished = false;
        }

        self.target = target;
        if let Some(target) = &self.target {
            debug!(target_id = %target, "document stream starting");
            let endpoint = Endpoint::from_template(&self.endpoint_template, target);
            let listener = DocumentListener {
                shared: Arc::clone(&self.shared),
            };
            self.session = Some(self.supervisor.open(endpoint, listener));
        }
    }

    /// Deliver pending frames and run a due reconnect.
    pub fn poll(&mut self) -> usize {
        self.supervisor.poll()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.supervisor.next_deadline()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.lock().projector.snapshot()
    }

    pub fn is_loading(&self) -> bool {
        self.target.is_some() && self.shared.lock().projector.is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.shared.lock().projector.error().map(String::from)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    pub fn target(&self) -> Option<&TargetId> {
        self.target.as_ref()
    }

    /// Operations dropped this session as undecodable or inapplicable.
    pub fn dropped_count(&self) -> u64 {
        self.shared.lock().projector.dropped_count()
    }
}

struct AppendShared<T> {
    buffer: BatchingBuffer<T>,
    status: ConnectionStatus,
    error: Option<String>,
    received: bool,
    dropped: u64,
    connected_once: bool,
    /// Set on reconnect; the next frame starts the replayed history.
    replay_pending: bool,
}

impl<T: Clone> AppendShared<T> {
    /// Drop what the previous connection delivered before its replay lands.
    fn begin_replay(&mut self) {
        if !self.replay_pending {
            return;
        }
        self.replay_pending = false;
        let target = self.buffer.target().clone();
        debug!(
            stream = %target,
            discarded = self.buffer.visible_len() + self.buffer.pending_len(),
            "replacing entries with replayed history"
        );
        self.buffer.reset(target);
        self.dropped = 0;
    }
}

struct AppendListener<T> {
    shared: Arc<Mutex<AppendShared<T>>>,
}

impl<T: DeserializeOwned + Clone> SessionListener for AppendListener<T> {
    fn on_message(&mut self, text: &str) {
        let mut shared = self.shared.lock();
        match StreamFrame::decode(text) {
            Ok(StreamFrame::Patch(ops)) => {
                shared.begin_replay();
                for raw in ops {
                    let Some(value) = raw.value else {
                        shared.dropped += 1;
                        warn!(op = ?raw.op, "dropping entry without value");
                        continue;
                    };
                    match serde_json::from_value::<T>(value) {
                        Ok(entry) => {
                            shared.received = true;
                            shared.error = None;
                            shared.buffer.push(entry);
                        }
                        Err(e) => {
                            shared.dropped += 1;
                            warn!(error = %e, "dropping undecodable entry");
                        }
                    }
                }
            }
            Ok(StreamFrame::Finished) => {
                shared.begin_replay();
                shared.buffer.finish();
            }
            Err(e) => warn!(error = %e, "dropping append frame"),
        }
    }

    fn on_state_change(&mut self, status: &ConnectionStatus) {
        let mut shared = self.shared.lock();
        shared.status = *status;
        match status.state {
            ConnectionState::Reconnecting if !shared.received => {
                shared.error = Some(CONNECTION_FAILED.to_string());
            }
            ConnectionState::Connected => {
                shared.error = None;
                // Every connection replays from the start.
                if shared.connected_once {
                    shared.replay_pending = true;
                }
                shared.connected_once = true;
            }
            _ => {}
        }
    }
}

/// An append-only entry stream with end-of-stream, batched for display.
///
/// Entries from `{"JsonPatch": [{"value": ...}]}` frames are decoded as
/// `T` and pushed through a [`BatchingBuffer`]. After `{"finished": true}`
/// the remaining entries are flushed and the session is closed on the
/// next [`poll`](Self::poll).
///
/// The server replays the full history on every connection. After a
/// reconnect the old entries stay visible until the first frame of the
/// replay arrives, then the buffer restarts under a new generation.
pub struct AppendStream<C: Connector, T> {
    endpoint_template: String,
    supervisor: ConnectionSupervisor<C>,
    shared: Arc<Mutex<AppendShared<T>>>,
    target: Option<TargetId>,
    session: Option<SessionHandle>,
}

/// Process output stream.
pub type LogStream<C> = AppendStream<C, LogEntry>;

impl<C, T> AppendStream<C, T>
where
    C: Connector,
    T: DeserializeOwned + Clone + 'static,
{
    pub fn new(
        endpoint_template: impl Into<String>,
        connector: C,
        backoff: &BackoffConfig,
        batch: BatchConfig,
        clock: SharedClock,
    ) -> Self {
        let buffer = BatchingBuffer::new(TargetId::new(""), batch, clock.clone());
        Self {
            endpoint_template: endpoint_template.into(),
            supervisor: ConnectionSupervisor::new(connector, backoff, clock),
            shared: Arc::new(Mutex::new(AppendShared {
                buffer,
                status: ConnectionStatus::idle(),
                error: None,
                received: false,
                dropped: 0,
                connected_once: false,
                replay_pending: false,
            })),
            target: None,
            session: None,
        }
    }

    /// Append-style diff stream with the diff batching profile.
    pub fn diffs(config: &SyncConfig, connector: C, clock: SharedClock) -> Self {
        Self::new(
            config.endpoints.diffs.clone(),
            connector,
            &config.backoff,
            config.batch.diffs.clone(),
            clock,
        )
    }

    /// Follow `target`, or stop with `None`. Entries restart empty.
    pub fn set_target(&mut self, target: Option<TargetId>) {
        if self.target == target {
            return;
        }
        if let Some(handle) = self.session.take() {
            self.supervisor.close(handle);
        }
        {
            let mut shared = self.shared.lock();
            let next = target.clone().unwrap_or_else(|| shared.buffer.target().clone());
            shared.buffer.reset(next);
            shared.status = ConnectionStatus::idle();
            shared.error = None;
            shared.received = false;
            shared.dropped = 0;
            shared.connected_once = false;
            shared.replay_pending = false;
        }

        self.target = target;
        if let Some(target) = &self.target {
            debug!(target_id = %target, "append stream starting");
            let endpoint = Endpoint::from_template(&self.endpoint_template, target);
            let listener = AppendListener {
                shared: Arc::clone(&self.shared),
            };
            self.session = Some(self.supervisor.open(endpoint, listener));
        }
    }

    /// Deliver frames, flush an elapsed batch, and close a finished session.
    pub fn poll(&mut self) -> usize {
        let delivered = self.supervisor.poll();

        let finished = {
            let mut shared = self.shared.lock();
            shared.buffer.poll();
            shared.buffer.is_finished()
        };
        if finished {
            if let Some(handle) = self.session.take() {
                debug!("stream finished, closing session");
                self.supervisor.close(handle);
            }
        }

        delivered
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(
            self.supervisor.next_deadline(),
            self.shared.lock().buffer.next_deadline(),
        )
    }

    /// Visible entries in arrival order.
    pub fn entries(&self) -> Arc<Vec<Keyed<T>>> {
        self.shared.lock().buffer.visible()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().buffer.pending_len()
    }

    /// Number of flushes this session.
    pub fn flush_count(&self) -> u64 {
        self.shared.lock().buffer.flush_count()
    }

    /// Nothing received yet and no error recorded.
    pub fn is_loading(&self) -> bool {
        let shared = self.shared.lock();
        self.target.is_some()
            && !shared.received
            && shared.error.is_none()
            && !shared.buffer.is_finished()
    }

    pub fn error(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock().buffer.is_finished()
    }

    pub fn target(&self) -> Option<&TargetId> {
        self.target.as_ref()
    }

    /// Entries dropped this session as undecodable.
    pub fn dropped_count(&self) -> u64 {
        self.shared.lock().dropped
    }
}

impl<C: Connector> AppendStream<C, LogEntry> {
    /// Process log stream with the log batching profile.
    pub fn logs(config: &SyncConfig, connector: C, clock: SharedClock) -> Self {
        Self::new(
            config.endpoints.logs.clone(),
            connector,
            &config.backoff,
            config.batch.logs.clone(),
            clock,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::LogChannel;
    use crate::connection::MemoryConnector;
    use crate::patch::RawPatchOp;
    use crate::schedule::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn log_frame(lines: std::ops::Range<u32>) -> String {
        let ops = lines
            .map(|i| RawPatchOp::entry(json!({"type": "STDOUT", "content": format!("line {}", i)})))
            .collect();
        StreamFrame::Patch(ops).encode()
    }

    #[test]
    fn test_document_stream_projects_tasks() {
        let connector = MemoryConnector::auto_open();
        let clock = ManualClock::shared();
        let mut stream = DocumentStream::tasks(&SyncConfig::default(), connector.clone(), clock);

        assert!(!stream.is_loading());
        stream.set_target(Some(TargetId::new("p1")));
        assert!(stream.is_loading());
        assert_eq!(connector.latest().unwrap().endpoint().path, "/streams/tasks/p1");

        let peer = connector.latest().unwrap();
        peer.send_json(&json!({"JsonPatch": [
            {"op": "replace", "path": "", "value": {"tasks": {"t1": {"id": "t1"}}}},
            {"op": "add", "path": "/tasks/t2", "value": {"id": "t2"}}
        ]}));
        stream.poll();

        assert!(!stream.is_loading());
        assert_eq!(stream.status().state, ConnectionState::Connected);
        let snap = stream.snapshot();
        assert_eq!(snap.pointer("/tasks/t2/id"), Some(&json!("t2")));
    }

    #[test]
    fn test_document_failure_before_data_sets_error() {
        let connector = MemoryConnector::new();
        connector.refuse_next(1);
        let clock = ManualClock::shared();
        let mut stream =
            DocumentStream::tasks(&SyncConfig::default(), connector.clone(), clock.clone());

        stream.set_target(Some(TargetId::new("p1")));
        assert_eq!(stream.error().as_deref(), Some(CONNECTION_FAILED));
        assert!(!stream.is_loading());
        assert_eq!(stream.status().state, ConnectionState::Reconnecting);

        clock.advance(Duration::from_secs(1));
        stream.poll();
        connector.latest().unwrap().open();
        stream.poll();
        assert_eq!(stream.error(), None);
    }

    #[test]
    fn test_document_reconnect_keeps_snapshot() {
        let connector = MemoryConnector::auto_open();
        let clock = ManualClock::shared();
        let mut stream =
            DocumentStream::tasks(&SyncConfig::default(), connector.clone(), clock.clone());
        stream.set_target(Some(TargetId::new("p1")));

        let peer = connector.latest().unwrap();
        peer.send_json(&json!({"JsonPatch": [{"op": "add", "path": "/tasks/a", "value": 1}]}));
        peer.drop_connection("reset by peer");
        stream.poll();

        assert_eq!(stream.status().state, ConnectionState::Reconnecting);
        assert_eq!(stream.error(), None);
        assert_eq!(stream.snapshot().pointer("/tasks/a"), Some(&json!(1)));
    }

    #[test]
    fn test_document_target_change_resets() {
        let connector = MemoryConnector::auto_open();
        let clock = ManualClock::shared();
        let mut stream = DocumentStream::tasks(&SyncConfig::default(), connector.clone(), clock);
        stream.set_target(Some(TargetId::new("p1")));
        connector
            .latest()
            .unwrap()
            .send_json(&json!({"JsonPatch": [{"op": "add", "path": "/tasks/a", "value": 1}]}));
        stream.poll();

        stream.set_target(Some(TargetId::new("p2")));
        assert!(connector.peer(0).unwrap().is_closed());
        assert!(stream.is_loading());
        assert_eq!(stream.snapshot().value(), &json!({"tasks": {}}));
    }

    #[test]
    fn test_log_stream_batches_and_closes_on_finish() {
        let connector = MemoryConnector::auto_open();
        let clock = ManualClock::shared();
        let mut stream = LogStream::logs(&SyncConfig::default(), connector.clone(), clock);
        stream.set_target(Some(TargetId::new("proc-1")));

        let peer = connector.latest().unwrap();
        peer.send(log_frame(0..60));
        stream.poll();
        assert_eq!(stream.entries().len(), 50);
        assert_eq!(stream.pending_len(), 10);

        peer.send(StreamFrame::Finished.encode());
        stream.poll();
        assert!(stream.is_finished());
        assert!(peer.is_closed());

        let entries = stream.entries();
        assert_eq!(entries.len(), 60);
        assert_eq!(entries[59].value.content, "line 59");
        assert_eq!(entries[0].value.channel, LogChannel::Stdout);
    }

    #[test]
    fn test_log_stream_timer_flush() {
        let connector = MemoryConnector::auto_open();
        let clock = ManualClock::shared();
        let mut stream = LogStream::logs(&SyncConfig::default(), connector.clone(), clock.clone());
        stream.set_target(Some(TargetId::new("proc-1")));

        connector.latest().unwrap().send(log_frame(0..3));
        stream.poll();
        assert_eq!(stream.entries().len(), 0);
        assert!(stream.next_deadline().is_some());

        clock.advance(Duration::from_millis(100));
        stream.poll();
        assert_eq!(stream.entries().len(), 3);
        assert_eq!(stream.flush_count(), 1);
    }

    #[test]
    fn test_log_stream_reconnect_replaces_with_replay() {
        let connector = MemoryConnector::auto_open();
        let clock = ManualClock::shared();
        let mut stream = LogStream::logs(&SyncConfig::default(), connector.clone(), clock.clone());
        stream.set_target(Some(TargetId::new("proc-1")));

        let first = connector.latest().unwrap();
        first.send(log_frame(0..5));
        first.drop_connection("reset by peer");
        stream.poll();

        clock.advance(Duration::from_secs(1));
        stream.poll();
        stream.poll();
        assert_eq!(connector.connection_count(), 2);
        assert_eq!(stream.status().state, ConnectionState::Connected);
        let before = stream.entries();
        assert_eq!(before.len(), 5);

        let second = connector.latest().unwrap();
        second.send(log_frame(0..6));
        stream.poll();
        clock.advance(Duration::from_millis(100));
        stream.poll();

        let after = stream.entries();
        let contents: Vec<_> = after.iter().map(|e| e.value.content.clone()).collect();
        let expected: Vec<_> = (0..6).map(|i| format!("line {}", i)).collect();
        assert_eq!(contents, expected);
        assert_eq!(after[0].key.position, 0);
        assert_ne!(after[0].key, before[0].key);
    }

    #[test]
    fn test_log_stream_recovered_connection_clears_error() {
        let connector = MemoryConnector::auto_open();
        connector.refuse_next(1);
        let clock = ManualClock::shared();
        let mut stream = LogStream::logs(&SyncConfig::default(), connector.clone(), clock.clone());

        stream.set_target(Some(TargetId::new("proc-1")));
        assert_eq!(stream.error().as_deref(), Some(CONNECTION_FAILED));
        assert!(!stream.is_loading());

        clock.advance(Duration::from_secs(1));
        stream.poll();
        stream.poll();
        assert_eq!(stream.status().state, ConnectionState::Connected);
        assert_eq!(stream.error(), None);
        assert!(stream.is_loading());

        // First connection to succeed is not a replay
        connector.latest().unwrap().send(log_frame(0..2));
        connector.latest().unwrap().send(StreamFrame::Finished.encode());
        stream.poll();
        assert_eq!(stream.entries().len(), 2);
    }

    #[test]
    fn test_bad_entries_are_dropped() {
        let connector = MemoryConnector::auto_open();
        let clock = ManualClock::shared();
        let mut stream = LogStream::logs(&SyncConfig::default(), connector.clone(), clock);
        stream.set_target(Some(TargetId::new("proc-1")));

        let peer = connector.latest().unwrap();
        peer.send_json(&json!({"JsonPatch": [
            {"value": {"type": "NOISE", "content": "x"}},
            {"op": "remove", "path": "/entries/0"},
            {"value": {"type": "STDERR", "content": "ok"}}
        ]}));
        peer.send("garbage");
        peer.send(StreamFrame::Finished.encode());
        stream.poll();

        assert_eq!(stream.dropped_count(), 2);
        assert_eq!(stream.entries().len(), 1);
        assert_eq!(stream.entries()[0].value, LogEntry::stderr("ok"));
    }
}
