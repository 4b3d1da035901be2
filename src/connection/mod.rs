//! Push connection lifecycle.
//!
//! A [`ConnectionSupervisor`] owns exactly one session at a time:
//! - opens it through a host-provided [`Connector`]
//! - hands every frame to the session's [`SessionListener`] in arrival order
//! - retries failed or dropped connections with capped exponential backoff
//! - guarantees silence after `close`
//!
//! # Example
//!
//! ```ignore
//! let mut supervisor = ConnectionSupervisor::new(connector, &config.backoff, SystemClock::shared());
//! let handle = supervisor.open(
//!     Endpoint::new("/streams/tasks/p1"),
//!     Callbacks::new(|frame: &str| println!("{frame}"), |status: &ConnectionStatus| {
//!         if status.show_reconnect_banner() { println!("reconnecting...") }
//!     }),
//! );
//!
//! loop {
//!     supervisor.poll();
//!     // wait for I/O or supervisor.next_deadline()
//! }
//! ```

mod memory;
mod supervisor;
mod transport;
mod types;

pub use memory::{MemoryConnector, MemoryPeer};
pub use supervisor::ConnectionSupervisor;
pub use transport::{CloseReason, Connection, Connector, EventSink, TransportEvent};
pub use types::{
    Backoff, Callbacks, ConnectionState, ConnectionStatus, SessionHandle, SessionListener,
};
