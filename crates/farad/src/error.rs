use std::io;

/// Transport-level failure. Any of these is terminal for the connection:
/// the dispatcher shuts the client down after observing one.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("TLS failure: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid server name: {0}")]
    InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),

    #[error("WebSocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connection closed by remote")]
    Closed,

    #[error("stream ended mid-frame")]
    TruncatedFrame,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failure: {0}")]
    Connection(#[from] ConnectionError),

    #[error("malformed envelope: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("request timed out")]
    Timeout,

    #[error("client has shut down")]
    Shutdown,

    #[error("not found")]
    NotFound,

    #[error("invalid response payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid bitcoin address: {0}")]
    InvalidAddress(String),

    #[error("checkpoint height must be greater or equal than block height")]
    CheckpointHeight,
}
