//! Error handling and edge case tests.

use patchwire::{
    ConnectionState, DocumentStream, FeedBridge, FeedPage, FeedUpdate, JsonPointer, LogStream,
    ManualClock, MemoryConnector, MemoryFeedSource, PatchOp, Projector, RawPatchOp, StreamFrame,
    SyncConfig, SyncError, TargetId,
};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

// --- Frame Errors ---

#[test]
fn test_malformed_frames_are_rejected() {
    assert!(matches!(
        StreamFrame::decode("{not json"),
        Err(SyncError::MalformedFrame(_))
    ));
    assert!(matches!(
        StreamFrame::decode(r#"{"finished": false}"#),
        Err(SyncError::MalformedFrame(_))
    ));
    assert!(matches!(
        StreamFrame::decode(r#"{"JsonPatch": {"op": "add"}}"#),
        Err(SyncError::MalformedFrame(_))
    ));
    assert!(matches!(
        FeedUpdate::decode(r#"{"type": "activity_feed.update", "payload": {}}"#),
        Err(SyncError::MalformedFrame(_))
    ));
}

#[test]
fn test_malformed_frames_do_not_break_stream() {
    let connector = MemoryConnector::auto_open();
    let clock = ManualClock::shared();
    let mut tasks = DocumentStream::tasks(&SyncConfig::default(), connector.clone(), clock);
    tasks.set_target(Some(TargetId::new("p")));

    let peer = connector.latest().unwrap();
    peer.send("\u{0}\u{1}");
    peer.send(r#"{"hello": "world"}"#);
    peer.send_json(&json!({"JsonPatch": [{"op": "add", "path": "/tasks/a", "value": {"id": "a"}}]}));
    tasks.poll();

    assert_eq!(tasks.status().state, ConnectionState::Connected);
    assert_eq!(tasks.error(), None);
    assert_eq!(tasks.snapshot().pointer("/tasks/a/id"), Some(&json!("a")));
}

// --- Patch Errors ---

#[test]
fn test_invalid_pointers() {
    assert!(matches!(
        JsonPointer::parse("tasks/a"),
        Err(SyncError::InvalidPointer(_))
    ));
    assert!(matches!(
        JsonPointer::parse("/bad~2escape"),
        Err(SyncError::InvalidPointer(_))
    ));
    assert!(PatchOp::remove("").is_err());
}

#[test]
fn test_unknown_and_inapplicable_ops_are_dropped() {
    let mut projector = Projector::keyed("tasks");
    let before = projector.snapshot();

    let after = projector.apply_raw(vec![
        RawPatchOp::new("copy", "/tasks/a", Some(json!(1))),
        RawPatchOp::new("test", "/tasks", None),
        RawPatchOp::new("replace", "/tasks/a/deep", Some(json!(1))),
        RawPatchOp::new("add", "/nope/deeper", Some(json!(1))),
    ]);

    assert_eq!(projector.dropped_count(), 4);
    assert!(before.ptr_eq(&after));
}

#[test]
fn test_array_index_errors() {
    let mut projector = Projector::new(|| json!({"items": [1, 2]}));
    let before = projector.snapshot();

    projector.apply(PatchOp::add("/items/5", json!(9)).unwrap());
    projector.apply(PatchOp::add("/items/01", json!(9)).unwrap());
    projector.apply(PatchOp::replace("/items/2", json!(9)).unwrap());
    assert!(projector.snapshot().ptr_eq(&before));

    let snap = projector.apply(PatchOp::add("/items/-", json!(3)).unwrap());
    assert_eq!(snap.value(), &json!({"items": [1, 2, 3]}));
}

// --- Connection Errors ---

#[test]
fn test_refused_connections_back_off() {
    let connector = MemoryConnector::new();
    connector.refuse_next(3);
    let clock = ManualClock::shared();
    let mut logs = LogStream::logs(&SyncConfig::default(), connector.clone(), clock.clone());
    logs.set_target(Some(TargetId::new("p")));

    assert_eq!(logs.status().state, ConnectionState::Reconnecting);
    assert_eq!(logs.error().as_deref(), Some("connection failed"));
    assert!(!logs.is_loading());

    // 1s, 2s, 4s
    for delay in [1, 2, 4] {
        clock.advance(Duration::from_millis(delay * 1000 - 1));
        logs.poll();
        assert_eq!(connector.connection_count(), 0);
        clock.advance(Duration::from_millis(1));
        logs.poll();
    }

    assert_eq!(connector.connection_count(), 1);
    assert_eq!(logs.status().state, ConnectionState::Connecting);
    assert_eq!(logs.status().attempt, 4);
    connector.latest().unwrap().open();
    logs.poll();
    assert_eq!(logs.status().state, ConnectionState::Connected);
    assert_eq!(logs.status().attempt, 0);
}

#[test]
fn test_clean_server_close_is_terminal() {
    let connector = MemoryConnector::auto_open();
    let clock = ManualClock::shared();
    let mut tasks = DocumentStream::tasks(&SyncConfig::default(), connector.clone(), clock.clone());
    tasks.set_target(Some(TargetId::new("p")));

    connector.latest().unwrap().close();
    tasks.poll();
    assert_eq!(tasks.status().state, ConnectionState::Disconnected);

    clock.advance(Duration::from_secs(60));
    tasks.poll();
    assert_eq!(connector.connection_count(), 1);
    assert_eq!(tasks.next_deadline(), None);
}

// --- Feed Errors ---

#[test]
fn test_pull_failure_surfaces_and_recovers() {
    let connector = MemoryConnector::auto_open();
    let source = MemoryFeedSource::new();
    let clock = ManualClock::shared();
    let mut bridge =
        FeedBridge::new(&SyncConfig::default(), connector, source.clone(), clock.clone());
    bridge.set_target(Some(TargetId::new("w")));

    source.respond_err("HTTP 500");
    bridge.poll();
    let view = bridge.view();
    assert!(!view.is_loading());
    assert_eq!(view.error().as_deref(), Some("Pull request failed: HTTP 500"));

    clock.advance(Duration::from_secs(1));
    bridge.poll();
    assert_eq!(source.pending_count(), 1);
    assert!(source.pending()[0].is_first_page());

    source.respond_ok(FeedPage::default());
    bridge.poll();
    assert_eq!(view.error(), None);
}

#[test]
fn test_load_more_failure_keeps_events() {
    let connector = MemoryConnector::auto_open();
    let source = MemoryFeedSource::new();
    let clock = ManualClock::shared();
    let mut bridge = FeedBridge::new(&SyncConfig::default(), connector, source.clone(), clock);
    bridge.set_target(Some(TargetId::new("w")));

    let page: FeedPage = serde_json::from_value(json!({
        "events": [{"id": "a", "created_at": "2025-01-01T00:00:00Z", "title": "A"}],
        "nextCursor": "c1"
    }))
    .unwrap();
    source.respond_ok(page);
    bridge.poll();

    bridge.load_more();
    source.respond_err("timeout");
    bridge.poll();

    let view = bridge.view();
    assert_eq!(view.len(), 1);
    assert!(view.error().is_some());
    assert!(bridge.has_more());

    // A retry is already scheduled
    bridge.load_more();
    assert_eq!(source.pending_count(), 0);
}

// --- Config Errors ---

#[test]
fn test_invalid_config_rejected() {
    let zero_threshold = r#"{"batch": {"logs": {"threshold": 0}}}"#;
    assert!(matches!(
        SyncConfig::from_json_str(zero_threshold),
        Err(SyncError::Config(_))
    ));

    let cap_below_base = r#"{"backoff": {"base": 5000, "cap": 1000}}"#;
    assert!(matches!(
        SyncConfig::from_json_str(cap_below_base),
        Err(SyncError::Config(_))
    ));

    assert!(matches!(
        SyncConfig::from_json_str("[1, 2]"),
        Err(SyncError::Deserialization(_))
    ));
}

#[test]
fn test_config_file_errors() {
    let missing = SyncConfig::load("/definitely/not/here.json");
    assert!(matches!(missing, Err(SyncError::Io(_))));

    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"feed": {{"page_size": 0}}}}"#).unwrap();
    assert!(matches!(SyncConfig::load(file.path()), Err(SyncError::Config(_))));
}
