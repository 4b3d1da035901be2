//! Adaptive batching buffer.

use super::types::{EntryKey, Keyed};
use crate::config::BatchConfig;
use crate::schedule::{SharedClock, Timer};
use crate::types::{Generation, TargetId};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Coalesces bursts of appended entries into bounded-rate flushes.
///
/// Entries land in a pending queue. The queue moves to the visible sequence
/// when it reaches `threshold` entries, when the flush window (measured from
/// the first pending entry) elapses, or on [`finish`](Self::finish). Order
/// is preserved and nothing is dropped.
///
/// Every flush publishes a new `Arc`; the previous one is never modified.
pub struct BatchingBuffer<T> {
    config: BatchConfig,
    clock: SharedClock,
    target: TargetId,
    generation: Generation,
    next_position: u64,
    pending: Vec<Keyed<T>>,
    visible: Arc<Vec<Keyed<T>>>,
    timer: Timer,
    finished: bool,
    flushes: u64,
}

impl<T: Clone> BatchingBuffer<T> {
    pub fn new(target: TargetId, config: BatchConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            target,
            generation: Generation::default(),
            next_position: 0,
            pending: Vec::new(),
            visible: Arc::new(Vec::new()),
            timer: Timer::new(),
            finished: false,
            flushes: 0,
        }
    }

    /// Append one entry. Returns true if this push triggered a flush.
    pub fn push(&mut self, value: T) -> bool {
        if self.finished {
            warn!(stream = %self.target, "entry after end of stream dropped");
            return false;
        }

        let key = EntryKey {
            target: self.target.clone(),
            generation: self.generation,
            position: self.next_position,
        };
        self.next_position += 1;
        self.pending.push(Keyed { key, value });

        if self.pending.len() >= self.config.threshold {
            self.flush();
            return true;
        }

        let at = self.clock.now() + self.config.window;
        self.timer.arm_if_idle(at, self.generation);
        false
    }

    /// Append several entries in order. Returns the number of flushes.
    pub fn extend<I>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut flushes = 0;
        for value in values {
            if self.push(value) {
                flushes += 1;
            }
        }
        flushes
    }

    /// Flush if the window has elapsed. Returns true if it flushed.
    pub fn poll(&mut self) -> bool {
        if self.timer.fire(self.clock.now(), self.generation) {
            self.flush();
            return true;
        }
        false
    }

    /// End of stream: flush whatever is pending, then stop accepting.
    pub fn finish(&mut self) {
        self.flush();
        self.timer.cancel();
        self.finished = true;
        debug!(stream = %self.target, total = self.visible.len(), "stream finished");
    }

    /// Forget everything and start a new session for `target`.
    pub fn reset(&mut self, target: TargetId) {
        self.generation = self.generation.next();
        self.target = target;
        self.next_position = 0;
        self.pending.clear();
        self.visible = Arc::new(Vec::new());
        self.timer.cancel();
        self.finished = false;
        self.flushes = 0;
    }

    fn flush(&mut self) {
        self.timer.cancel();
        if self.pending.is_empty() {
            return;
        }
        let count = self.pending.len();
        Arc::make_mut(&mut self.visible).extend(self.pending.drain(..));
        self.flushes += 1;
        debug!(
            stream = %self.target,
            count,
            visible = self.visible.len(),
            "flushed batch"
        );
    }

    /// Consumer-visible entries.
    pub fn visible(&self) -> Arc<Vec<Keyed<T>>> {
        Arc::clone(&self.visible)
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of flushes (renders) this session.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}
