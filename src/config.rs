//! Configuration for the sync layer.
//!
//! Every section has defaults; a JSON document only needs to name the
//! fields it overrides. Durations are written as milliseconds.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconnect backoff for every push session.
    pub backoff: BackoffConfig,

    /// Batching profiles per append-style stream kind.
    pub batch: BatchProfiles,

    /// Feed pull/push settings.
    pub feed: FeedConfig,

    /// Push endpoint templates.
    pub endpoints: StreamEndpoints,
}

impl SyncConfig {
    /// Parse a JSON document, filling unspecified fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject values that would stall or spin the scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.backoff.base.is_zero() {
            return Err(SyncError::Config("backoff.base must be > 0".into()));
        }
        if self.backoff.cap < self.backoff.base {
            return Err(SyncError::Config(format!(
                "backoff.cap ({:?}) is below backoff.base ({:?})",
                self.backoff.cap, self.backoff.base
            )));
        }
        for (name, batch) in [("logs", &self.batch.logs), ("diffs", &self.batch.diffs)] {
            if batch.threshold == 0 {
                return Err(SyncError::Config(format!(
                    "batch.{}.threshold must be > 0",
                    name
                )));
            }
        }
        if self.feed.page_size == 0 {
            return Err(SyncError::Config("feed.page_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Exponential backoff: `min(base * 2^failures, cap)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_millis")]
    pub base: Duration,
    #[serde(with = "duration_millis")]
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(8),
        }
    }
}

/// Flush policy for one batching buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Pending entries that force an immediate flush.
    /// Default: 50
    pub threshold: usize,

    /// Time from the first pending entry until a timed flush.
    /// Default: 100ms
    #[serde(with = "duration_millis")]
    pub window: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            window: Duration::from_millis(100),
        }
    }
}

/// Batching policy per stream kind. Both default to the same pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchProfiles {
    pub logs: BatchConfig,
    pub diffs: BatchConfig,
}

/// Feed settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Events requested per page.
    pub page_size: usize,

    /// Scope used when a bridge is enabled without an explicit one.
    pub default_scope: String,

    /// Retries after a failed pull before giving up until the next trigger.
    pub pull_retry_attempts: u32,

    #[serde(with = "duration_millis")]
    pub pull_retry_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            default_scope: "all".to_string(),
            pull_retry_attempts: 3,
            pull_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Push endpoint templates. `{target}` is replaced by the target id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamEndpoints {
    pub tasks: String,
    pub diffs: String,
    pub logs: String,
    pub feed: String,
}

impl Default for StreamEndpoints {
    fn default() -> Self {
        Self {
            tasks: "/streams/tasks/{target}".to_string(),
            diffs: "/streams/diffs/{target}".to_string(),
            logs: "/streams/logs/{target}".to_string(),
            feed: "/streams/feed/{target}".to_string(),
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
