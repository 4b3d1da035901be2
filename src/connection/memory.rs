//! In-process transport.
//!
//! `MemoryConnector` records every connection attempt and exposes the server
//! side of each one as a [`MemoryPeer`]. Hosts that already own their I/O can
//! push frames through a peer; tests use it to script servers.

use super::transport::{CloseReason, Connection, Connector, EventSink};
use crate::error::{Result, SyncError};
use crate::types::Endpoint;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct MemoryState {
    /// Connect calls to refuse before accepting again.
    refuse: usize,
    /// Emit `Opened` as soon as a connection is accepted.
    auto_open: bool,
    peers: Vec<MemoryPeer>,
}

/// Connector whose connections live in memory.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that opens every accepted connection immediately.
    pub fn auto_open() -> Self {
        let connector = Self::default();
        connector.state.lock().auto_open = true;
        connector
    }

    /// Refuse the next `n` connect calls.
    pub fn refuse_next(&self, n: usize) {
        self.state.lock().refuse = n;
    }

    /// Number of accepted connections so far.
    pub fn connection_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    /// Server side of the most recent accepted connection.
    pub fn latest(&self) -> Option<MemoryPeer> {
        self.state.lock().peers.last().cloned()
    }

    /// Server side of the `index`-th accepted connection.
    pub fn peer(&self, index: usize) -> Option<MemoryPeer> {
        self.state.lock().peers.get(index).cloned()
    }
}

impl Connector for MemoryConnector {
    fn connect(&mut self, endpoint: &Endpoint, sink: EventSink) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if state.refuse > 0 {
            state.refuse -= 1;
            return Err(SyncError::Connect(format!("{} refused", endpoint)));
        }

        let closed = Arc::new(AtomicBool::new(false));
        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            sink,
            closed: Arc::clone(&closed),
        };
        if state.auto_open {
            peer.open();
        }
        state.peers.push(peer);

        Ok(Box::new(MemoryConnection { closed }))
    }
}

struct MemoryConnection {
    closed: Arc<AtomicBool>,
}

impl Connection for MemoryConnection {
    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server end of one in-memory connection.
#[derive(Clone, Debug)]
pub struct MemoryPeer {
    endpoint: Endpoint,
    sink: EventSink,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// True once the client side closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.sink.opened();
    }

    pub fn send(&self, text: impl Into<String>) {
        self.sink.message(text);
    }

    pub fn send_json(&self, value: &serde_json::Value) {
        self.sink.message(value.to_string());
    }

    /// Close cleanly from the server side.
    pub fn close(&self) {
        self.sink.closed(CloseReason::Normal);
    }

    /// Drop the connection with an error.
    pub fn drop_connection(&self, reason: impl Into<String>) {
        self.sink.closed(CloseReason::Abnormal(reason.into()));
    }

    /// Fail the handshake.
    pub fn fail(&self, error: impl Into<String>) {
        self.sink.failed(error);
    }
}
