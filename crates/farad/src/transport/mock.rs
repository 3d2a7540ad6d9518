//! In-memory transport for unit tests: records outbound frames and lets
//! tests inject inbound frames and the terminal error.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::ConnectionError;

use super::{Transport, TransportStreams, FRAME_BUFFER};

pub(crate) struct MockTransport {
    sent: mpsc::UnboundedSender<String>,
    fail_sends: AtomicBool,
    close_calls: AtomicUsize,
}

/// Test-side handle to a [`MockTransport`].
pub(crate) struct MockHandle {
    /// Frames the client wrote, in write order.
    pub(crate) sent: mpsc::UnboundedReceiver<String>,
    /// Sender for injecting inbound frames.
    pub(crate) frames: mpsc::Sender<String>,
    /// Sender for injecting the terminal transport error.
    pub(crate) errors: mpsc::Sender<ConnectionError>,
    pub(crate) transport: Arc<MockTransport>,
}

impl MockTransport {
    pub(crate) fn channels() -> (Arc<Self>, TransportStreams, MockHandle) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (frame_tx, frames) = mpsc::channel(FRAME_BUFFER);
        let (error_tx, errors) = mpsc::channel(1);
        let transport = Arc::new(Self {
            sent: sent_tx,
            fail_sends: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        (
            Arc::clone(&transport),
            TransportStreams { frames, errors },
            MockHandle {
                sent: sent_rx,
                frames: frame_tx,
                errors: error_tx,
                transport,
            },
        )
    }

    /// Make every further `send` fail with a broken pipe.
    pub(crate) fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: &str) -> Result<(), ConnectionError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        self.sent
            .send(frame.to_owned())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe).into())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A client wired to a mock transport.
pub(crate) fn mock_client(
    config: ClientConfig,
) -> (Client, mpsc::Receiver<ConnectionError>, MockHandle) {
    let (transport, streams, handle) = MockTransport::channels();
    let (client, conn_errors) = Client::new(transport, streams, config);
    (client, conn_errors, handle)
}
