//! Time sources and timers.
//!
//! Nothing in this crate sleeps or spawns timer threads. Components record
//! deadlines on a [`Timer`] and the host calls their `poll()` once
//! `next_deadline()` has passed. Tests drive time with [`ManualClock`].

mod clock;
mod timer;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use timer::Timer;
