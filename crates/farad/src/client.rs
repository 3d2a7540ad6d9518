//! The connection multiplexer: one client per connection, one background
//! dispatcher routing inbound frames to pending requests (by id) and push
//! subscribers (by method name).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ConnectionError, Error};
use crate::transport::{
    default_tls_config, TcpTransport, TlsTransport, Transport, TransportStreams,
    WebSocketTransport,
};
use crate::wire::{self, Routed};

/// An undecoded push notification, as fanned out to `subscribe` streams.
#[derive(Debug, Clone)]
pub struct RawNotification {
    pub method: String,
    pub params: Value,
}

type PendingSlot = oneshot::Sender<Result<Value, Error>>;

pub(crate) struct ClientInner {
    transport: Arc<dyn Transport>,
    /// One outstanding response slot per request id. Guarded separately from
    /// the push table so request traffic never waits on subscriber upkeep.
    pending: Mutex<HashMap<u64, PendingSlot>>,
    push: Mutex<HashMap<String, Vec<mpsc::Sender<RawNotification>>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    pub(crate) config: ClientConfig,
}

impl ClientInner {
    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "transport close failed during shutdown");
        }
        self.pending.lock().await.clear();
        self.push.lock().await.clear();
    }
}

/// Handle to one Electrum connection. Cheap to clone; all clones share the
/// connection and shut down together.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Wire a client over an established transport. Returns the client and
    /// the connection-error observer: it yields the terminal
    /// [`ConnectionError`], if any, that shut the connection down.
    pub fn new(
        transport: Arc<dyn Transport>,
        streams: TransportStreams,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ConnectionError>) {
        let (error_tx, error_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(ClientInner {
            transport,
            pending: Mutex::new(HashMap::new()),
            push: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            shutdown_tx,
            config,
        });

        tokio::spawn(dispatch(Arc::clone(&inner), streams, error_tx, shutdown_rx));

        (Self { inner }, error_rx)
    }

    /// Connect over plain TCP (`host:port`).
    pub async fn dial_tcp(
        addr: &str,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ConnectionError>), Error> {
        let (transport, streams) = TcpTransport::dial_tcp(addr, config.log_frames).await?;
        Ok(Self::new(Arc::new(transport), streams, config))
    }

    /// Connect over TLS (`host:port`) with the given `rustls` configuration;
    /// [`default_tls_config`] trusts the bundled webpki roots.
    pub async fn dial_tls(
        addr: &str,
        tls: Arc<rustls::ClientConfig>,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ConnectionError>), Error> {
        let (transport, streams) =
            TlsTransport::dial_tls(addr, tls, config.log_frames).await?;
        Ok(Self::new(Arc::new(transport), streams, config))
    }

    /// Connect over a WebSocket URL (`ws://` or `wss://`).
    pub async fn dial_ws(
        url: &str,
        tls: Arc<rustls::ClientConfig>,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ConnectionError>), Error> {
        let (transport, streams) =
            WebSocketTransport::dial(url, tls, config.ws_close_timeout, config.log_frames).await?;
        Ok(Self::new(Arc::new(transport), streams, config))
    }

    /// Connect over WebSocket with the default TLS configuration.
    pub async fn dial_ws_default(
        url: &str,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ConnectionError>), Error> {
        Self::dial_ws(url, default_tls_config(), config).await
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Close the transport and release all connection state. Idempotent;
    /// requests already in flight are not force-failed and keep running
    /// against their own deadlines.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Issue one RPC and wait for the matching response or the deadline,
    /// whichever comes first. Responses are matched by id, so out-of-order
    /// server replies resolve correctly.
    pub async fn request(
        &self,
        deadline: Duration,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, Error> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&wire::Request {
            id,
            method,
            params: &params,
        })?;

        let (slot, response) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, slot);
        debug!(rpc.id = id, rpc.method = method, "request");

        if let Err(err) = self.inner.transport.send(&frame).await {
            self.inner.pending.lock().await.remove(&id);
            self.inner.shutdown().await;
            return Err(Error::Connection(err));
        }

        let started = tokio::time::Instant::now();
        let outcome = match tokio::time::timeout(deadline, response).await {
            Ok(Ok(delivered)) => delivered,
            Err(_elapsed) => Err(Error::Timeout),
            Ok(Err(_slot_swept)) => {
                // The shutdown sweep dropped the slot. The caller's deadline
                // stays the only binding bound, so do not fail early.
                tokio::time::sleep(deadline.saturating_sub(started.elapsed())).await;
                Err(Error::Timeout)
            }
        };
        self.inner.pending.lock().await.remove(&id);
        outcome
    }

    /// [`request`](Self::request) plus result deserialization.
    pub async fn call<T: DeserializeOwned>(
        &self,
        deadline: Duration,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, Error> {
        let raw = self.request(deadline, method, params).await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// Register interest in push notifications for `method`. Every
    /// registered stream receives every notification for that method, in
    /// dispatcher arrival order; a stream whose buffer is full misses the
    /// notification rather than stalling the dispatcher. There is no
    /// unsubscribe: stop reading, or shut the client down.
    pub async fn subscribe(&self, method: &str) -> mpsc::Receiver<RawNotification> {
        let (sink, stream) = mpsc::channel(self.inner.config.notification_buffer);
        if !self.is_shutdown() {
            self.inner
                .push
                .lock()
                .await
                .entry(method.to_owned())
                .or_default()
                .push(sink);
        }
        stream
    }
}

/// The dispatcher loop: waits on the first of shutdown, a transport error,
/// or an inbound frame.
async fn dispatch(
    inner: Arc<ClientInner>,
    mut streams: TransportStreams,
    error_observer: mpsc::Sender<ConnectionError>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            err = streams.errors.recv() => {
                if let Some(err) = err {
                    warn!(error = %err, "transport failure; shutting down");
                    let _ = error_observer.try_send(err);
                }
                inner.shutdown().await;
                break;
            }
            frame = streams.frames.recv() => match frame {
                Some(frame) => route(&inner, &frame).await,
                None => {
                    // Reader ended; its terminal error, if any, is queued.
                    if let Some(err) = streams.errors.recv().await {
                        warn!(error = %err, "transport failure; shutting down");
                        let _ = error_observer.try_send(err);
                    }
                    inner.shutdown().await;
                    break;
                }
            },
        }
    }
}

async fn route(inner: &ClientInner, raw: &str) {
    match wire::decode(raw) {
        Ok(Routed::Notification { method, params }) => {
            let push = inner.push.lock().await;
            let Some(sinks) = push.get(&method) else {
                trace!(rpc.method = %method, "notification without subscribers; dropped");
                return;
            };
            for sink in sinks {
                let delivery = sink.try_send(RawNotification {
                    method: method.clone(),
                    params: params.clone(),
                });
                if let Err(mpsc::error::TrySendError::Full(_)) = delivery {
                    warn!(rpc.method = %method, "subscriber buffer full; notification dropped");
                }
                // A closed sink means its consumer stopped reading; the
                // entry stays until client shutdown.
            }
        }
        Ok(Routed::Response { id, outcome }) => {
            let slot = inner.pending.lock().await.remove(&id);
            match slot {
                // An abandoned slot absorbs the send without blocking.
                Some(slot) => {
                    let _ = slot.send(outcome.map_err(Error::Server));
                }
                None => trace!(rpc.id = id, "response with no pending request; dropped"),
            }
        }
        Err(failure) => match failure.id {
            Some(id) => {
                if let Some(slot) = inner.pending.lock().await.remove(&id) {
                    let _ = slot.send(Err(Error::Protocol(failure.reason)));
                }
            }
            None => debug!(reason = %failure.reason, "undecodable frame dropped"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::mock_client;
    use serde_json::json;

    const DEADLINE: Duration = Duration::from_secs(5);

    fn parse(frame: &str) -> Value {
        serde_json::from_str(frame).expect("client frames are valid JSON")
    }

    #[tokio::test]
    async fn out_of_order_replies_reach_their_callers() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let mut callers = Vec::new();
        for n in 0..3i64 {
            let client = client.clone();
            callers.push(tokio::spawn(async move {
                client.request(DEADLINE, "echo", vec![json!(n)]).await
            }));
        }

        let mut sent = Vec::new();
        for _ in 0..3 {
            sent.push(parse(&handle.sent.recv().await.expect("frame sent")));
        }
        // Reply in reverse submission order; ids still match callers up.
        for envelope in sent.iter().rev() {
            let reply = json!({"id": envelope["id"], "result": envelope["params"][0]});
            handle.frames.send(reply.to_string()).await.unwrap();
        }

        for (n, caller) in callers.into_iter().enumerate() {
            let result = caller.await.unwrap().expect("request succeeds");
            assert_eq!(result, json!(n as i64));
        }
    }

    #[tokio::test]
    async fn timed_out_request_is_purged_and_tardy_reply_is_dropped() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let err = client
            .request(Duration::from_millis(30), "server.banner", Vec::new())
            .await
            .expect_err("no reply within deadline");
        assert!(matches!(err, Error::Timeout));
        assert!(client.inner.pending.lock().await.is_empty());

        // The tardy reply for the purged id must be dropped without upsetting
        // the dispatcher.
        let envelope = parse(&handle.sent.recv().await.unwrap());
        let tardy = json!({"id": envelope["id"], "result": "late"});
        handle.frames.send(tardy.to_string()).await.unwrap();

        let live = tokio::spawn({
            let client = client.clone();
            async move { client.request(DEADLINE, "server.banner", Vec::new()).await }
        });
        let envelope = parse(&handle.sent.recv().await.unwrap());
        let reply = json!({"id": envelope["id"], "result": "still here"});
        handle.frames.send(reply.to_string()).await.unwrap();
        assert_eq!(live.await.unwrap().unwrap(), json!("still here"));
    }

    #[tokio::test]
    async fn server_error_string_becomes_server_error() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let caller = tokio::spawn({
            let client = client.clone();
            async move { client.request(DEADLINE, "blockchain.relayfee", Vec::new()).await }
        });
        let envelope = parse(&handle.sent.recv().await.unwrap());
        let reply = json!({"id": envelope["id"], "error": "excessive resource usage"});
        handle.frames.send(reply.to_string()).await.unwrap();

        let err = caller.await.unwrap().expect_err("server error");
        assert!(matches!(err, Error::Server(message) if message == "excessive resource usage"));
    }

    #[tokio::test]
    async fn recoverable_id_in_malformed_envelope_fails_the_caller_fast() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let caller = tokio::spawn({
            let client = client.clone();
            async move { client.request(DEADLINE, "server.features", Vec::new()).await }
        });
        let envelope = parse(&handle.sent.recv().await.unwrap());
        // `error` as an object does not decode in this dialect.
        let reply = json!({"id": envelope["id"], "error": {"code": -1, "message": "?"}});
        handle.frames.send(reply.to_string()).await.unwrap();

        let err = caller.await.unwrap().expect_err("protocol error");
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn notifications_fan_out_per_method() {
        let (client, _errors, handle) = mock_client(ClientConfig::default());

        let mut first = client.subscribe("M").await;
        let mut second = client.subscribe("M").await;
        let mut other = client.subscribe("N").await;

        let push_m = json!({"method": "M", "params": [1]});
        let push_n = json!({"method": "N", "params": [2]});
        handle.frames.send(push_m.to_string()).await.unwrap();
        handle.frames.send(push_n.to_string()).await.unwrap();

        assert_eq!(first.recv().await.unwrap().params, json!([1]));
        assert_eq!(second.recv().await.unwrap().params, json!([1]));
        // The "N" subscriber sees only its own method's notification.
        assert_eq!(other.recv().await.unwrap().params, json!([2]));
    }

    #[tokio::test]
    async fn full_subscriber_drops_notifications_without_stalling_the_dispatcher() {
        let config = ClientConfig {
            notification_buffer: 1,
            ..ClientConfig::default()
        };
        let (client, _errors, mut handle) = mock_client(config);

        let mut stalled = client.subscribe("M").await;
        for n in 0..3 {
            let push = json!({"method": "M", "params": [n]});
            handle.frames.send(push.to_string()).await.unwrap();
        }

        // The dispatcher must still answer requests while the subscriber's
        // buffer sits full.
        let caller = tokio::spawn({
            let client = client.clone();
            async move { client.request(DEADLINE, "server.ping", Vec::new()).await }
        });
        let envelope = parse(&handle.sent.recv().await.unwrap());
        let reply = json!({"id": envelope["id"], "result": null});
        handle.frames.send(reply.to_string()).await.unwrap();
        caller.await.unwrap().expect("dispatcher still live");

        assert_eq!(stalled.recv().await.unwrap().params, json!([0]));
        assert!(stalled.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_fails_later_requests_fast() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        client.shutdown().await;
        client.shutdown().await;
        assert_eq!(handle.transport.close_calls(), 1);

        let err = client
            .request(DEADLINE, "server.ping", Vec::new())
            .await
            .expect_err("client is down");
        assert!(matches!(err, Error::Shutdown));
        // The transport was never touched for the rejected request.
        assert!(handle.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_failure_shuts_the_client_down() {
        let (client, _errors, handle) = mock_client(ClientConfig::default());

        handle.transport.fail_sends();
        let err = client
            .request(DEADLINE, "server.ping", Vec::new())
            .await
            .expect_err("write fails");
        assert!(matches!(err, Error::Connection(_)));
        assert!(client.is_shutdown());
        assert_eq!(handle.transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn transport_error_reaches_the_observer_and_triggers_shutdown() {
        let (client, mut errors, handle) = mock_client(ClientConfig::default());

        handle.errors.send(ConnectionError::Closed).await.unwrap();
        assert!(matches!(
            errors.recv().await.unwrap(),
            ConnectionError::Closed
        ));

        for _ in 0..100 {
            if client.is_shutdown() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(client.is_shutdown());
    }

    #[tokio::test]
    async fn in_flight_request_rides_out_its_deadline_across_shutdown() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let caller = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .request(Duration::from_millis(200), "server.banner", Vec::new())
                    .await
            }
        });
        handle.sent.recv().await.expect("request written");

        let started = tokio::time::Instant::now();
        client.shutdown().await;
        let err = caller.await.unwrap().expect_err("never answered");
        // The sweep must not fail the caller early; only its own deadline
        // resolves it.
        assert!(matches!(err, Error::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
