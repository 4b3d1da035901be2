//! Property tests for ordering, de-duplication and append semantics.

use chrono::{TimeZone, Utc};
use patchwire::{
    BatchConfig, BatchingBuffer, FeedEvent, FeedScope, FeedStore, ManualClock, PatchOp, Projector,
    TargetId,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Clone, Debug)]
enum Step {
    Push(u16),
    Wait(u64),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => any::<u16>().prop_map(Step::Push),
        1 => (0u64..250).prop_map(Step::Wait),
    ]
}

fn event_strategy() -> impl Strategy<Value = FeedEvent> {
    ("[a-f]{1,2}", 0u32..30, any::<bool>(), 0i32..3).prop_map(
        |(id, minute, action_required, urgency)| FeedEvent {
            id,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap(),
            action_required,
            urgency,
            category: None,
            title: String::new(),
            body: None,
            action: None,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    /// The visible sequence only grows, keeps push order, and ends complete.
    #[test]
    fn append_is_monotonic(steps in prop::collection::vec(step_strategy(), 0..300)) {
        let clock = ManualClock::shared();
        let mut buffer = BatchingBuffer::new(
            TargetId::new("p"),
            BatchConfig::default(),
            clock.clone(),
        );
        let mut pushed = Vec::new();
        let mut last_len = 0;

        for step in steps {
            match step {
                Step::Push(v) => {
                    pushed.push(v);
                    buffer.push(v);
                }
                Step::Wait(ms) => {
                    clock.advance(Duration::from_millis(ms));
                    buffer.poll();
                }
            }
            let visible = buffer.visible();
            prop_assert!(visible.len() >= last_len);
            prop_assert!(buffer.pending_len() < 50);
            let values: Vec<u16> = visible.iter().map(|k| k.value).collect();
            prop_assert_eq!(&values[..], &pushed[..visible.len()]);
            last_len = visible.len();
        }

        buffer.finish();
        let visible = buffer.visible();
        let values: Vec<u16> = visible.iter().map(|k| k.value).collect();
        prop_assert_eq!(values, pushed);
        let keys: HashSet<_> = visible.iter().map(|k| k.key.clone()).collect();
        prop_assert_eq!(keys.len(), visible.len());
    }

    /// Any interleaving of pages and upserts leaves one entry per id,
    /// holding the last write.
    #[test]
    fn feed_dedups_by_id(
        first in prop::collection::vec(event_strategy(), 0..20),
        pushes in prop::collection::vec(event_strategy(), 0..20),
        second in prop::collection::vec(event_strategy(), 0..20),
    ) {
        let store = FeedStore::new(FeedScope::all());
        let mut expected: HashMap<String, FeedEvent> = HashMap::new();

        store.replace(first.clone(), Some("c1".into()));
        for e in first {
            expected.insert(e.id.clone(), e);
        }
        for e in pushes {
            store.upsert(e.clone());
            expected.insert(e.id.clone(), e);
        }
        store.append(second.clone(), None);
        for e in second {
            expected.insert(e.id.clone(), e);
        }

        let visible = store.visible();
        prop_assert_eq!(visible.len(), expected.len());
        for event in visible.iter() {
            prop_assert_eq!(Some(event), expected.get(&event.id));
        }
    }

    /// High priority first; newest first within each group.
    #[test]
    fn feed_priority_ordering(
        events in prop::collection::vec(event_strategy(), 0..30),
        dismiss in prop::collection::vec("[a-f]{1,2}", 0..5),
    ) {
        let store = FeedStore::new(FeedScope::all());
        store.replace(events, None);
        for id in &dismiss {
            store.dismiss(id);
        }

        let visible = store.visible();
        let high = store.high_priority_count();
        for (i, event) in visible.iter().enumerate() {
            let is_high = event.action_required && !store.is_dismissed(&event.id);
            prop_assert_eq!(is_high, i < high);
        }
        for pair in visible[..high].windows(2).chain(visible[high..].windows(2)) {
            prop_assert!(pair[0].created_at >= pair[1].created_at);
            if pair[0].created_at == pair[1].created_at {
                prop_assert!(pair[0].urgency >= pair[1].urgency);
            }
        }
    }

    /// Removing an absent key never produces a new snapshot.
    #[test]
    fn removal_is_idempotent(keys in prop::collection::vec("[a-d]", 1..10)) {
        let mut projector = Projector::keyed("tasks");
        for key in &keys {
            projector.apply(PatchOp::add(&format!("/tasks/{}", key), json!({"id": key})).unwrap());
        }
        for key in &keys {
            let path = format!("/tasks/{}", key);
            projector.apply(PatchOp::remove(&path).unwrap());
            let once = projector.snapshot();
            let twice = projector.apply(PatchOp::remove(&path).unwrap());
            prop_assert!(once.ptr_eq(&twice));
        }
        let snap = projector.snapshot();
        prop_assert_eq!(snap.value(), &json!({"tasks": {}}));
    }
}
