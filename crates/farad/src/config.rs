use std::time::Duration;

/// Per-client configuration, injected at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Log raw inbound and outbound frame payloads at trace level.
    pub log_frames: bool,

    /// Buffer capacity of each push-subscriber sink. A notification for a
    /// sink with no free buffer space is dropped, never queued.
    pub notification_buffer: usize,

    /// Buffer capacity of a scripthash subscription's output stream.
    pub scripthash_buffer: usize,

    /// How long a WebSocket close handshake may wait for the server's close
    /// reply before the socket is forced closed.
    pub ws_close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_frames: false,
            notification_buffer: 32,
            scripthash_buffer: 32,
            ws_close_timeout: Duration::from_secs(3),
        }
    }
}
