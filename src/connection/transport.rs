//! Transport seam between the supervisor and the host's network stack.

use crate::error::Result;
use crate::types::{Endpoint, Generation};
use crossbeam_channel::Sender;

/// Something a transport observed on one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened,
    /// One inbound UTF-8 frame.
    Message(String),
    /// Connection closed.
    Closed(CloseReason),
    /// Connection failed (open error or I/O error).
    Failed(String),
}

/// How a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Server closed cleanly; the stream is complete.
    Normal,
    /// Dropped, reset, or closed with an error code.
    Abnormal(String),
}

/// A transport event tagged with the connection attempt that produced it.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub generation: Generation,
    pub event: TransportEvent,
}

/// Write end handed to a transport for one connection attempt.
///
/// Transports may call it from any thread. Every event carries the
/// generation of the attempt, so events from an abandoned connection are
/// ignored by the supervisor.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: Generation,
    tx: Sender<Delivery>,
}

impl EventSink {
    pub(crate) fn new(generation: Generation, tx: Sender<Delivery>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Report an event. Returns false if the supervisor is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Delivery {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.send(TransportEvent::Opened)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.send(TransportEvent::Message(text.into()))
    }

    pub fn closed(&self, reason: CloseReason) -> bool {
        self.send(TransportEvent::Closed(reason))
    }

    pub fn failed(&self, error: impl Into<String>) -> bool {
        self.send(TransportEvent::Failed(error.into()))
    }
}

/// A live (or pending) connection owned by the supervisor.
pub trait Connection {
    /// Close the connection. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens connections for the supervisor.
///
/// `connect` must not block on the handshake: it starts the attempt and
/// reports progress through `sink`. Returning an error is treated like an
/// open failure and schedules a retry.
pub trait Connector {
    fn connect(&mut self, endpoint: &Endpoint, sink: EventSink) -> Result<Box<dyn Connection>>;
}
