//! Batching for high-frequency append-only streams.
//!
//! Log and diff streams can deliver hundreds of entries per second. The
//! [`BatchingBuffer`] bounds how often the visible sequence changes:
//! - a full batch (`threshold` entries) flushes immediately
//! - a partial batch flushes once `window` has passed since its first entry
//! - end of stream flushes synchronously
//!
//! Each entry gets an [`EntryKey`] that stays the same across flushes.

mod buffer;
mod types;

pub use buffer::BatchingBuffer;
pub use types::{EntryKey, Keyed, LogChannel, LogEntry};
