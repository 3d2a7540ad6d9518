//! WebSocket transport. Each inbound message is already one frame, so there
//! is no splitting logic; close performs the protocol-level close handshake
//! with a bounded wait before forcing the socket closed.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::trace;

use crate::error::ConnectionError;

use super::{Transport, TransportStreams, FRAME_BUFFER};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    /// Signalled by the reader task when the server's close frame (or the
    /// end of the stream) is observed.
    closed: Arc<Notify>,
    close_timeout: Duration,
    log_frames: bool,
}

impl WebSocketTransport {
    /// Dial `url` (`ws://...` or `wss://...`); `tls` applies to `wss`.
    pub async fn dial(
        url: &str,
        tls: Arc<rustls::ClientConfig>,
        close_timeout: Duration,
        log_frames: bool,
    ) -> Result<(Self, TransportStreams), ConnectionError> {
        let (ws, _response) =
            connect_async_tls_with_config(url, None, false, Some(Connector::Rustls(tls))).await?;
        let (sink, stream) = ws.split();

        let (frame_tx, frames) = mpsc::channel(FRAME_BUFFER);
        let (error_tx, errors) = mpsc::channel(1);
        let closed = Arc::new(Notify::new());

        tokio::spawn(read_loop(
            stream,
            frame_tx,
            error_tx,
            Arc::clone(&closed),
            log_frames,
        ));

        Ok((
            Self {
                writer: Mutex::new(sink),
                closed,
                close_timeout,
                log_frames,
            },
            TransportStreams { frames, errors },
        ))
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    frames: mpsc::Sender<String>,
    errors: mpsc::Sender<ConnectionError>,
    closed: Arc<Notify>,
    log_frames: bool,
) {
    loop {
        let err = match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = text.as_str().to_owned();
                if log_frames {
                    trace!(len = frame.len(), frame = %frame, "inbound frame");
                }
                if frames.send(frame).await.is_err() {
                    return;
                }
                continue;
            }
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(frame) => {
                    if log_frames {
                        trace!(len = frame.len(), frame = %frame, "inbound frame");
                    }
                    if frames.send(frame).await.is_err() {
                        return;
                    }
                    continue;
                }
                Err(err) => io::Error::new(io::ErrorKind::InvalidData, err).into(),
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) | None => ConnectionError::Closed,
            Some(Err(err)) => err.into(),
        };
        closed.notify_waiters();
        let _ = errors.send(err).await;
        return;
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: &str) -> Result<(), ConnectionError> {
        if self.log_frames {
            trace!(len = frame.len(), frame = %frame, "outbound frame");
        }
        let mut writer = self.writer.lock().await;
        writer.send(Message::text(frame.to_owned())).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        // Register interest before sending the close frame so a fast server
        // reply is not missed.
        let acknowledged = self.closed.notified();
        {
            let mut writer = self.writer.lock().await;
            match writer.send(Message::Close(None)).await {
                Ok(()) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
        let _ = tokio::time::timeout(self.close_timeout, acknowledged).await;
        let _ = self.writer.lock().await.close().await;
        Ok(())
    }
}
