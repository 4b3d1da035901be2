//! Entry identity and log entry types.

use crate::types::{Generation, TargetId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of one appended entry.
///
/// Derived from the session (target + buffer generation) and the entry's
/// append position, so it survives batching and never collides across
/// resets.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub target: TargetId,
    pub generation: Generation,
    pub position: u64,
}

impl fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryKey({})", self)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}:{}", self.target, self.generation, self.position)
    }
}

/// An entry paired with its identity.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyed<T> {
    pub key: EntryKey,
    pub value: T,
}

/// Output channel of a process log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogChannel {
    Stdout,
    Stderr,
}

/// One unit of process output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub channel: LogChannel,
    pub content: String,
}

impl LogEntry {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            channel: LogChannel::Stdout,
            content: content.into(),
        }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self {
            channel: LogChannel::Stderr,
            content: content.into(),
        }
    }
}
