//! Push connection supervisor.

use super::transport::{CloseReason, Connection, Connector, Delivery, EventSink, TransportEvent};
use super::types::{Backoff, ConnectionState, ConnectionStatus, SessionHandle, SessionListener};
use crate::config::BackoffConfig;
use crate::schedule::{SharedClock, Timer};
use crate::types::{Endpoint, Generation};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Internal session state.
struct Session {
    handle: SessionHandle,
    endpoint: Endpoint,
    listener: Box<dyn SessionListener>,
    status: ConnectionStatus,
    connection: Option<Box<dyn Connection>>,
    retry: Timer,
}

impl Session {
    /// Move to `state` and tell the listener. Same-state moves are silent.
    fn transition(&mut self, state: ConnectionState) {
        if self.status.state == state {
            return;
        }
        debug!(
            endpoint = %self.endpoint,
            from = %self.status.state,
            to = %state,
            attempt = self.status.attempt,
            "connection state change"
        );
        self.status.state = state;
        self.listener.on_state_change(&self.status);
    }

    fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }
}

/// Owns one push session: open, receive, retry with backoff, close.
///
/// The supervisor never interprets frames. It is driven by [`poll`], which
/// drains transport events in arrival order and starts any retry whose
/// backoff has elapsed.
///
/// Every connection attempt gets a fresh [`Generation`]. Closing, failing
/// or replacing a session advances the generation, so anything a stale
/// transport still reports is dropped before it reaches a listener.
///
/// [`poll`]: ConnectionSupervisor::poll
pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    clock: SharedClock,
    backoff: Backoff,
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
    /// Generation of the current connection attempt.
    generation: Generation,
    next_handle: u64,
    session: Option<Session>,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, backoff: &BackoffConfig, clock: SharedClock) -> Self {
        let (tx, rx) = unbounded();
        Self {
            connector,
            clock,
            backoff: Backoff::new(backoff),
            tx,
            rx,
            generation: Generation::default(),
            next_handle: 0,
            session: None,
        }
    }

    /// Start a session. An existing session is closed first.
    pub fn open<L>(&mut self, endpoint: Endpoint, listener: L) -> SessionHandle
    where
        L: SessionListener + 'static,
    {
        if let Some(existing) = self.session.as_ref().map(|s| s.handle) {
            self.close(existing);
        }

        self.next_handle += 1;
        let handle = SessionHandle(self.next_handle);
        self.backoff.reset();
        self.session = Some(Session {
            handle,
            endpoint,
            listener: Box::new(listener),
            status: ConnectionStatus::idle(),
            connection: None,
            retry: Timer::new(),
        });

        self.connect();
        handle
    }

    /// Close a session. Idempotent; unknown or stale handles are ignored.
    ///
    /// After this returns the session's listener has been dropped, so no
    /// further callbacks can reach it.
    pub fn close(&mut self, handle: SessionHandle) {
        if self.session.as_ref().map(|s| s.handle) != Some(handle) {
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        self.generation = self.generation.next();
        self.backoff.reset();
        session.retry.cancel();
        session.drop_connection();
        session.transition(ConnectionState::Disconnected);
        debug!(endpoint = %session.endpoint, "session closed");
    }

    /// Deliver pending transport events and run a due retry.
    ///
    /// Returns the number of events handed to the session.
    pub fn poll(&mut self) -> usize {
        let mut delivered = 0;

        while let Ok(delivery) = self.rx.try_recv() {
            if self.session.is_none() || delivery.generation != self.generation {
                trace!(
                    generation = ?delivery.generation,
                    current = ?self.generation,
                    "dropping event from superseded connection"
                );
                continue;
            }
            delivered += 1;
            self.handle_event(delivery.event);
        }

        let now = self.clock.now();
        let generation = self.generation;
        let retry_due = self
            .session
            .as_mut()
            .map(|s| s.retry.fire(now, generation))
            .unwrap_or(false);
        if retry_due {
            self.connect();
        }

        delivered
    }

    /// When `poll` next has timed work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.retry.deadline())
    }

    pub fn status(&self) -> Option<ConnectionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    /// State of the current session, `Disconnected` if there is none.
    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map_or(ConnectionState::Disconnected, |s| s.status.state)
    }

    pub fn is_open(&self, handle: SessionHandle) -> bool {
        self.session.as_ref().map(|s| s.handle) == Some(handle)
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.session.as_ref().map(|s| &s.endpoint)
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn connect(&mut self) {
        self.generation = self.generation.next();
        let sink = EventSink::new(self.generation, self.tx.clone());

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.drop_connection();
        session.status.attempt = session.status.attempt.saturating_add(1);
        session.transition(ConnectionState::Connecting);

        match self.connector.connect(&session.endpoint, sink) {
            Ok(connection) => session.connection = Some(connection),
            Err(e) => {
                warn!(endpoint = %session.endpoint, error = %e, "connect failed");
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        // Seal the failed attempt so its late events are ignored.
        self.generation = self.generation.next();
        let delay = self.backoff.next_delay();
        let at = self.clock.now() + delay;

        if let Some(session) = self.session.as_mut() {
            session.drop_connection();
            session.retry.arm(at, self.generation);
            debug!(endpoint = %session.endpoint, ?delay, "retry scheduled");
            session.transition(ConnectionState::Reconnecting);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            TransportEvent::Opened => {
                self.backoff.reset();
                session.status.attempt = 0;
                session.status.has_connected = true;
                session.transition(ConnectionState::Connected);
            }
            TransportEvent::Message(text) => {
                session.listener.on_message(&text);
            }
            TransportEvent::Closed(CloseReason::Normal) => {
                self.generation = self.generation.next();
                session.drop_connection();
                session.retry.cancel();
                session.transition(ConnectionState::Disconnected);
            }
            TransportEvent::Closed(CloseReason::Abnormal(reason)) => {
                warn!(endpoint = %session.endpoint, %reason, "connection dropped");
                self.schedule_retry();
            }
            TransportEvent::Failed(error) => {
                warn!(endpoint = %session.endpoint, %error, "connection failed");
                self.schedule_retry();
            }
        }
    }
}

impl<C: Connector> Drop for ConnectionSupervisor<C> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.drop_connection();
        }
    }
}
