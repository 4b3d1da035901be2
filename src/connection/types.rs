//! Connection lifecycle types.

use crate::config::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of one push session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Session created, no attempt made yet.
    Idle,
    /// An attempt is in progress.
    Connecting,
    /// Handshake done, frames flowing.
    Connected,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Closed explicitly or cleanly by the server. No retry is pending.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// What a session listener sees on every transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Connect attempts since the last successful open.
    pub attempt: u32,
    /// Whether this session has ever reached `Connected`.
    pub has_connected: bool,
}

impl ConnectionStatus {
    pub fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            has_connected: false,
        }
    }

    /// The reconnect banner is shown after more than one attempt while
    /// the session is not connected.
    pub fn show_reconnect_banner(&self) -> bool {
        self.attempt > 1
            && matches!(
                self.state,
                ConnectionState::Reconnecting | ConnectionState::Disconnected
            )
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// Identifies one `open` call on a supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Receives a session's frames and transitions.
pub trait SessionListener {
    /// One inbound frame, in arrival order.
    fn on_message(&mut self, text: &str);

    /// Called synchronously on every state transition.
    fn on_state_change(&mut self, _status: &ConnectionStatus) {}
}

/// Listener built from two closures.
pub struct Callbacks<M, S> {
    on_message: M,
    on_state_change: S,
}

impl<M, S> Callbacks<M, S>
where
    M: FnMut(&str),
    S: FnMut(&ConnectionStatus),
{
    pub fn new(on_message: M, on_state_change: S) -> Self {
        Self {
            on_message,
            on_state_change,
        }
    }
}

impl<M, S> SessionListener for Callbacks<M, S>
where
    M: FnMut(&str),
    S: FnMut(&ConnectionStatus),
{
    fn on_message(&mut self, text: &str) {
        (self.on_message)(text)
    }

    fn on_state_change(&mut self, status: &ConnectionStatus) {
        (self.on_state_change)(status)
    }
}

/// Exponential reconnect delay with a cap.
///
/// The delay before retry `k` (1-based) is `min(base * 2^(k-1), cap)`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: config.base,
            cap: config.cap,
            failures: 0,
        }
    }

    /// Delay after `failures` consecutive failures (0 = first retry).
    pub fn delay_for(&self, failures: u32) -> Duration {
        1u32.checked_shl(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Back to `base` after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
