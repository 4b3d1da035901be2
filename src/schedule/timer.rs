//! One-shot, generation-tagged timer.

use crate::types::Generation;
use std::time::Instant;

/// A single pending deadline.
///
/// The timer remembers which generation armed it. [`Timer::fire`] only
/// reports an expiry for the generation the caller considers current, so a
/// deadline armed by a superseded session can never run its action.
#[derive(Clone, Debug, Default)]
pub struct Timer {
    armed: Option<(Instant, Generation)>,
}

impl Timer {
    pub fn new() -> Self {
        Self { armed: None }
    }

    /// Arm (or re-arm) the timer.
    pub fn arm(&mut self, at: Instant, generation: Generation) {
        self.armed = Some((at, generation));
    }

    /// Arm only if nothing is pending. Returns true if the timer was armed.
    pub fn arm_if_idle(&mut self, at: Instant, generation: Generation) -> bool {
        if self.armed.is_some() {
            return false;
        }
        self.armed = Some((at, generation));
        true
    }

    pub fn cancel(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|(at, _)| at)
    }

    /// Consume the deadline if it has passed.
    ///
    /// A stale deadline (armed under another generation) is discarded and
    /// never reported as fired.
    pub fn fire(&mut self, now: Instant, current: Generation) -> bool {
        match self.armed {
            Some((_, generation)) if generation != current => {
                tracing::trace!(?generation, ?current, "discarding stale timer");
                self.armed = None;
                false
            }
            Some((at, _)) if at <= now => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}
