//! Async client for the Electrum server protocol.
//!
//! One long-lived connection (TCP, TLS, or WebSocket) carries both
//! request/response RPCs and unsolicited push notifications. A background
//! dispatcher correlates responses to callers by request id and fans
//! notifications out to subscribers by method name; the
//! [`ScripthashSubscription`] manager layers resumable scripthash tracking
//! on top. There is no automatic reconnection: after a connection loss the
//! owner dials a fresh client, seeds a manager with the old manager's
//! [`snapshot`](ScripthashSubscription::snapshot) through
//! [`Client::scripthash_subscription_with`], and calls
//! [`ScripthashSubscription::resubscribe`].

pub mod address;
pub mod client;
pub mod config;
pub mod error;
mod methods;
pub mod subscription;
pub mod transport;
pub mod types;
mod wire;

pub use address::address_to_scripthash;
pub use client::{Client, RawNotification};
pub use config::ClientConfig;
pub use error::{ConnectionError, Error};
pub use methods::{CLIENT_VERSION, PROTOCOL_VERSION};
pub use subscription::{ScripthashSubscription, HEADERS_SUBSCRIBE, SCRIPTHASH_SUBSCRIBE};
pub use transport::{default_tls_config, Transport, TransportStreams};
