//! Feed event types and wire frames.

use crate::error::{Result, SyncError};
use crate::patch::truncate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Frame `type` carried by push feed updates.
pub const FEED_UPDATE_TYPE: &str = "activity_feed.update";

/// One notification-like unit of the feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub id: String,
    pub created_at: DateTime<Utc>,

    /// Needs the user's attention.
    #[serde(default)]
    pub action_required: bool,

    /// Higher is more urgent. Tie-breaker within equal timestamps.
    #[serde(default)]
    pub urgency: i32,

    /// Scope/filter classification assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<CallToAction>,
}

/// Where an event's call-to-action leads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToAction {
    pub label: String,
    pub href: String,
}

/// Active filter of a feed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedScope(String);

impl FeedScope {
    pub fn new(scope: impl Into<String>) -> Self {
        FeedScope(scope.into())
    }

    pub fn all() -> Self {
        FeedScope("all".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FeedScope {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedScope({})", self.0)
    }
}

impl fmt::Display for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedScope {
    fn from(s: &str) -> Self {
        FeedScope::new(s)
    }
}

/// One page from the pull endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub events: Vec<FeedEvent>,
    #[serde(rename = "nextCursor", alias = "next_cursor", default)]
    pub next_cursor: Option<String>,
}

/// What happened to an event upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedChangeKind {
    Created,
    Updated,
    Removed,
}

/// Payload of a push feed update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedUpdate {
    pub id: String,
    pub change_type: FeedChangeKind,
    #[serde(default)]
    pub event: Option<FeedEvent>,
}

/// A decoded, validated store instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedChange {
    Upsert(FeedEvent),
    Remove(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl FeedUpdate {
    /// Decode a push frame.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| SyncError::MalformedFrame(format!("feed frame: {}", e)))?;

        if envelope.kind != FEED_UPDATE_TYPE {
            return Err(SyncError::MalformedFrame(format!(
                "unknown feed frame type {:?}",
                envelope.kind
            )));
        }

        let event = envelope.payload.get("event").cloned().ok_or_else(|| {
            SyncError::MalformedFrame(format!("feed update without event: {}", truncate(text, 120)))
        })?;
        serde_json::from_value(event)
            .map_err(|e| SyncError::MalformedFrame(format!("feed update: {}", e)))
    }

    /// Encode as a push frame, mainly for scripted servers.
    pub fn encode(&self) -> String {
        serde_json::json!({
            "type": FEED_UPDATE_TYPE,
            "payload": { "event": self },
        })
        .to_string()
    }

    pub fn upsert(event: FeedEvent) -> Self {
        Self {
            id: event.id.clone(),
            change_type: FeedChangeKind::Updated,
            event: Some(event),
        }
    }

    pub fn removed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            change_type: FeedChangeKind::Removed,
            event: None,
        }
    }

    /// Validate and turn into a store instruction.
    pub fn into_change(self) -> Result<FeedChange> {
        match self.change_type {
            FeedChangeKind::Removed => Ok(FeedChange::Remove(self.id)),
            FeedChangeKind::Created | FeedChangeKind::Updated => {
                let event = self.event.ok_or_else(|| {
                    SyncError::MalformedFrame(format!("{:?} update for {} without event", self.change_type, self.id))
                })?;
                if event.id != self.id {
                    return Err(SyncError::MalformedFrame(format!(
                        "update id {} does not match event id {}",
                        self.id, event.id
                    )));
                }
                Ok(FeedChange::Upsert(event))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_json(id: &str) -> Value {
        json!({
            "id": id,
            "created_at": "2025-01-02T03:04:05Z",
            "action_required": true,
            "title": "Review needed",
            "action": {"label": "Open", "href": "/attempts/1"}
        })
    }

    #[test]
    fn test_decode_update() {
        let frame = json!({
            "type": "activity_feed.update",
            "payload": {"event": {"id": "e1", "change_type": "created", "event": event_json("e1")}}
        });
        let update = FeedUpdate::decode(&frame.to_string()).unwrap();
        assert_eq!(update.change_type, FeedChangeKind::Created);

        match update.into_change().unwrap() {
            FeedChange::Upsert(event) => {
                assert!(event.action_required);
                assert_eq!(event.urgency, 0);
                assert_eq!(event.action.unwrap().href, "/attempts/1");
            }
            other => panic!("Expected Upsert, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_removal_with_null_event() {
        let frame = json!({
            "type": "activity_feed.update",
            "payload": {"event": {"id": "e1", "change_type": "removed", "event": null}}
        });
        let change = FeedUpdate::decode(&frame.to_string())
            .unwrap()
            .into_change()
            .unwrap();
        assert_eq!(change, FeedChange::Remove("e1".into()));
    }

    #[test]
    fn test_update_without_event_rejected() {
        let update = FeedUpdate {
            id: "e1".into(),
            change_type: FeedChangeKind::Updated,
            event: None,
        };
        assert!(matches!(update.into_change(), Err(SyncError::MalformedFrame(_))));
    }

    #[test]
    fn test_mismatched_id_rejected() {
        let event: FeedEvent = serde_json::from_value(event_json("other")).unwrap();
        let update = FeedUpdate {
            id: "e1".into(),
            change_type: FeedChangeKind::Created,
            event: Some(event),
        };
        assert!(update.into_change().is_err());
    }

    #[test]
    fn test_unknown_frame_type() {
        let result = FeedUpdate::decode(r#"{"type": "presence.ping", "payload": {}}"#);
        assert!(matches!(result, Err(SyncError::MalformedFrame(_))));
        assert!(FeedUpdate::decode("[]").is_err());
    }

    #[test]
    fn test_encode_decode_update() {
        let event: FeedEvent = serde_json::from_value(event_json("e9")).unwrap();
        let update = FeedUpdate::upsert(event);
        assert_eq!(FeedUpdate::decode(&update.encode()).unwrap(), update);
    }

    #[test]
    fn test_page_cursor_aliases() {
        let page: FeedPage =
            serde_json::from_value(json!({"events": [], "nextCursor": "c2"})).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
        let page: FeedPage =
            serde_json::from_value(json!({"events": [], "next_cursor": null})).unwrap();
        assert_eq!(page.next_cursor, None);
    }
}
