//! Newline-delimited framing over a byte stream (TCP or TLS).

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::error::ConnectionError;

use super::{Transport, TransportStreams, FRAME_BUFFER};

pub type TcpTransport = StreamTransport<TcpStream>;
pub type TlsTransport = StreamTransport<tokio_rustls::client::TlsStream<TcpStream>>;

/// A stream transport: each frame is one `'\n'`-terminated JSON text. A
/// dedicated reader task buffers the stream and splits on the delimiter.
pub struct StreamTransport<S> {
    writer: Mutex<WriteHalf<S>>,
    log_frames: bool,
}

impl StreamTransport<TcpStream> {
    /// Open a plain TCP connection to `addr` (`host:port`).
    pub async fn dial_tcp(
        addr: &str,
        log_frames: bool,
    ) -> Result<(Self, TransportStreams), ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, log_frames))
    }
}

impl StreamTransport<tokio_rustls::client::TlsStream<TcpStream>> {
    /// Open a TLS connection to `addr` (`host:port`). The host part is used
    /// as the SNI server name.
    pub async fn dial_tls(
        addr: &str,
        tls: Arc<rustls::ClientConfig>,
        log_frames: bool,
    ) -> Result<(Self, TransportStreams), ConnectionError> {
        let server_name = rustls::pki_types::ServerName::try_from(sni_host(addr)?.to_owned())?;

        let tcp = TcpStream::connect(addr).await?;
        let stream = TlsConnector::from(tls).connect(server_name, tcp).await?;
        Ok(Self::from_stream(stream, log_frames))
    }
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an established byte stream, spawning its reader task. Exposed so
    /// callers can layer the client on streams this crate does not dial
    /// itself (proxied sockets, in-memory pipes in tests).
    pub fn from_stream(stream: S, log_frames: bool) -> (Self, TransportStreams) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (frame_tx, frames) = mpsc::channel(FRAME_BUFFER);
        let (error_tx, errors) = mpsc::channel(1);

        tokio::spawn(read_loop(read_half, frame_tx, error_tx, log_frames));

        (
            Self {
                writer: Mutex::new(write_half),
                log_frames,
            },
            TransportStreams { frames, errors },
        )
    }
}

async fn read_loop<S: AsyncRead + Send + 'static>(
    read_half: ReadHalf<S>,
    frames: mpsc::Sender<String>,
    errors: mpsc::Sender<ConnectionError>,
    log_frames: bool,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let err = match reader.read_until(b'\n', &mut buf).await {
            Err(err) => err.into(),
            Ok(0) => ConnectionError::Closed,
            // A partial frame followed by end-of-stream is a read error,
            // not a frame.
            Ok(_) if buf.last() != Some(&b'\n') => ConnectionError::TruncatedFrame,
            Ok(_) => {
                buf.pop();
                match String::from_utf8(std::mem::take(&mut buf)) {
                    Ok(line) => {
                        if log_frames {
                            trace!(len = line.len(), frame = %line, "inbound frame");
                        }
                        if frames.send(line).await.is_err() {
                            // Dispatcher gone; nothing left to read for.
                            return;
                        }
                        continue;
                    }
                    Err(err) => io::Error::new(io::ErrorKind::InvalidData, err).into(),
                }
            }
        };
        let _ = errors.send(err).await;
        return;
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&self, frame: &str) -> Result<(), ConnectionError> {
        if self.log_frames {
            trace!(len = frame.len(), frame = %frame, "outbound frame");
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            // Already closed, locally or by the remote.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// The SNI host of an endpoint: everything before the last `:`, with the
/// brackets of an IPv6 literal stripped.
fn sni_host(addr: &str) -> Result<&str, ConnectionError> {
    let (host, _) = addr
        .rsplit_once(':')
        .ok_or_else(|| ConnectionError::InvalidEndpoint(format!("{addr}: missing port")))?;
    Ok(host
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host))
}

/// A `rustls` client configuration trusting the bundled webpki roots.
pub fn default_tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .expect("ring provider supports the default protocol versions")
    .with_root_certificates(roots)
    .with_no_client_auth();
    Arc::new(config)
}
