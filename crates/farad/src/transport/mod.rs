//! Framed transports carrying the Electrum wire protocol.
//!
//! All variants present the same shape to the dispatcher: an async `send`
//! for outbound frames, a channel of inbound frames, and a channel that
//! yields at most one terminal [`ConnectionError`] after which the frame
//! channel stops.

mod stream;
mod ws;

#[cfg(test)]
pub(crate) mod mock;

pub use stream::{default_tls_config, StreamTransport, TcpTransport, TlsTransport};
pub use ws::WebSocketTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

/// Capacity of the channel between a transport's reader task and the
/// dispatcher.
const FRAME_BUFFER: usize = 64;

/// Read side of a transport, consumed by the client's dispatcher.
pub struct TransportStreams {
    /// Decoded frames, one JSON text each, delimiter stripped.
    pub frames: mpsc::Receiver<String>,
    /// At most one terminal error; the frame channel closes after it.
    pub errors: mpsc::Receiver<ConnectionError>,
}

/// A framed, bidirectional channel to the remote server.
///
/// Implementations guard their write half with a mutex so concurrent
/// `request` callers may write without external serialization. `close` is
/// idempotent; closing an already-closed transport is a no-op.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one frame. Synchronous and unbuffered: the transport performs
    /// no internal queuing.
    async fn send(&self, frame: &str) -> Result<(), ConnectionError>;

    async fn close(&self) -> Result<(), ConnectionError>;
}
