//! Transport abstraction for relay connections.
//!
//! The sync passes never touch sockets directly. They go through a
//! [`RelayConnector`], which hands out one [`RelayConnection`] per relay
//! session:
//! - `connect()` opens a connection to one relay address
//! - `send()` transmits one text frame
//! - `recv()` yields the next text frame, `None` once the relay closed
//! - `close()` terminates gracefully
//!
//! Timeouts are not the transport's concern; the session layer wraps every
//! call in its idle window and deadline.
//!
//! Production uses [`WebSocketConnector`]; tests script relays with
//! [`MockConnector`].

pub mod mock;
mod websocket;

pub use mock::{MockConnector, MockRelay};
pub use websocket::WebSocketConnector;

use crate::error::Result;
use async_trait::async_trait;

/// Opens connections to relays.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Connect to the relay at `url`.
    ///
    /// Failures are reported as [`crate::Error::ConnectionFailure`].
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>>;
}

/// One open relay connection carrying JSON text frames.
#[async_trait]
pub trait RelayConnection: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Receive the next text frame.
    ///
    /// Returns `None` once the relay closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the connection. Errors are ignored; the connection is gone either way.
    async fn close(&mut self);
}
