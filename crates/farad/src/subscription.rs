//! Stateful subscriptions layered on the push registry: the header stream
//! convenience and the resumable scripthash subscription manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

use crate::client::{Client, RawNotification};
use crate::error::Error;
use crate::types::{HeaderNotification, ScripthashNotification};

pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";

impl Client {
    /// Subscribe to new block headers. The returned stream is seeded with
    /// the server's immediate reply (the current tip), then carries every
    /// subsequent push. The listener stops on a terminal decode error.
    pub async fn subscribe_headers(
        &self,
        deadline: Duration,
    ) -> Result<mpsc::Receiver<HeaderNotification>, Error> {
        // Register before issuing the request so no push can slip between
        // the reply and the registration.
        let mut raw = self.subscribe(HEADERS_SUBSCRIBE).await;
        let tip: HeaderNotification = self.call(deadline, HEADERS_SUBSCRIBE, Vec::new()).await?;

        let (headers_tx, headers) = mpsc::channel(self.inner.config.notification_buffer);
        let _ = headers_tx.send(tip).await;

        tokio::spawn(async move {
            while let Some(note) = raw.recv().await {
                let decoded: Vec<HeaderNotification> = match serde_json::from_value(note.params) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        debug!(error = %err, "undecodable header notification; listener stopped");
                        return;
                    }
                };
                for header in decoded {
                    if headers_tx.send(header).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(headers)
    }

    /// Create a scripthash subscription manager and its output stream. The
    /// manager filters raw `blockchain.scripthash.subscribe` pushes down to
    /// the scripthashes added through it.
    pub async fn scripthash_subscription(
        &self,
    ) -> (
        ScripthashSubscription,
        mpsc::Receiver<ScripthashNotification>,
    ) {
        self.scripthash_subscription_with(Vec::new()).await
    }

    /// [`scripthash_subscription`](Self::scripthash_subscription) seeded
    /// with a tracked snapshot taken from another manager. This is the
    /// reconnection path: after a connection loss, take
    /// [`ScripthashSubscription::snapshot`] from the old manager, seed a
    /// manager on the freshly dialed client, and call
    /// [`ScripthashSubscription::resubscribe`] to re-establish the
    /// server-side subscriptions. Seeding alone issues no requests.
    pub async fn scripthash_subscription_with(
        &self,
        snapshot: Vec<(String, Option<String>)>,
    ) -> (
        ScripthashSubscription,
        mpsc::Receiver<ScripthashNotification>,
    ) {
        let raw = self.subscribe(SCRIPTHASH_SUBSCRIBE).await;
        let (events_tx, events) = mpsc::channel(self.inner.config.scripthash_buffer);

        let mut state = TrackedState::default();
        for (scripthash, address) in snapshot {
            if let Some(address) = address {
                state.addresses.insert(scripthash.clone(), address);
            }
            state.scripthashes.push(scripthash);
        }
        let tracked = Arc::new(RwLock::new(state));

        tokio::spawn(filter(raw, Arc::clone(&tracked), events_tx.clone()));

        (
            ScripthashSubscription {
                client: self.clone(),
                tracked,
                events: events_tx,
            },
            events,
        )
    }
}

#[derive(Default)]
struct TrackedState {
    /// Tracked scripthashes in subscription order. Append-only under `add`;
    /// duplicates are permitted and not coalesced.
    scripthashes: Vec<String>,
    /// Optional scripthash → address bookkeeping for callers that subscribe
    /// by address.
    addresses: HashMap<String, String>,
}

/// Tracks a resumable set of scripthash subscriptions over one [`Client`].
///
/// The protocol has no unsubscribe message, so `remove` only stops local
/// filtering. After a reconnect (new transport, new client), hand
/// [`snapshot`](Self::snapshot) from the old manager to
/// [`Client::scripthash_subscription_with`] on the new client, then call
/// [`resubscribe`](Self::resubscribe) to replay every subscription.
pub struct ScripthashSubscription {
    client: Client,
    tracked: Arc<RwLock<TrackedState>>,
    events: mpsc::Sender<ScripthashNotification>,
}

impl ScripthashSubscription {
    /// Subscribe to `scripthash` and start tracking it. A repeated `add`
    /// tracks the scripthash twice. If the server's immediate reply carries
    /// a status, one initial notification is synthesized onto the output
    /// stream so the caller always observes a first value.
    pub async fn add(
        &self,
        deadline: Duration,
        scripthash: &str,
        address: Option<&str>,
    ) -> Result<(), Error> {
        self.subscribe_remote(deadline, scripthash).await?;

        let mut state = self.tracked.write().await;
        state.scripthashes.push(scripthash.to_owned());
        if let Some(address) = address {
            state
                .addresses
                .insert(scripthash.to_owned(), address.to_owned());
        }
        Ok(())
    }

    /// Issue the subscribe request for `scripthash` and synthesize the
    /// initial notification from its reply, without touching tracked state.
    async fn subscribe_remote(&self, deadline: Duration, scripthash: &str) -> Result<(), Error> {
        let status: Option<String> = self
            .client
            .call(deadline, SCRIPTHASH_SUBSCRIBE, vec![json!(scripthash)])
            .await?;

        if status.is_some() {
            let seeded = self.events.try_send(ScripthashNotification {
                scripthash: scripthash.to_owned(),
                status,
            });
            if seeded.is_err() {
                warn!(%scripthash, "output stream full; initial status dropped");
            }
        }
        Ok(())
    }

    /// Stop tracking the first matching entry and drop its address mapping.
    /// No protocol message is sent.
    pub async fn remove(&self, scripthash: &str) -> Result<(), Error> {
        let mut state = self.tracked.write().await;
        let position = state
            .scripthashes
            .iter()
            .position(|tracked| tracked == scripthash)
            .ok_or(Error::NotFound)?;
        state.scripthashes.remove(position);
        state.addresses.remove(scripthash);
        Ok(())
    }

    /// [`remove`](Self::remove) by registered address.
    pub async fn remove_by_address(&self, address: &str) -> Result<(), Error> {
        let mut state = self.tracked.write().await;
        let scripthash = state
            .addresses
            .iter()
            .find(|(_, registered)| registered.as_str() == address)
            .map(|(scripthash, _)| scripthash.clone())
            .ok_or(Error::NotFound)?;
        let position = state
            .scripthashes
            .iter()
            .position(|tracked| *tracked == scripthash)
            .ok_or(Error::NotFound)?;
        state.scripthashes.remove(position);
        state.addresses.remove(&scripthash);
        Ok(())
    }

    pub async fn address_of(&self, scripthash: &str) -> Result<String, Error> {
        self.tracked
            .read()
            .await
            .addresses
            .get(scripthash)
            .cloned()
            .ok_or(Error::NotFound)
    }

    pub async fn scripthash_of(&self, address: &str) -> Result<String, Error> {
        self.tracked
            .read()
            .await
            .addresses
            .iter()
            .find(|(_, registered)| registered.as_str() == address)
            .map(|(scripthash, _)| scripthash.clone())
            .ok_or(Error::NotFound)
    }

    /// The tracked scripthashes, in subscription order.
    pub async fn tracked(&self) -> Vec<String> {
        self.tracked.read().await.scripthashes.clone()
    }

    /// The tracked scripthashes with their registered addresses, in
    /// subscription order. Feed this to
    /// [`Client::scripthash_subscription_with`] on a freshly dialed client
    /// to carry the subscription set across a reconnect.
    pub async fn snapshot(&self) -> Vec<(String, Option<String>)> {
        let state = self.tracked.read().await;
        state
            .scripthashes
            .iter()
            .map(|scripthash| (scripthash.clone(), state.addresses.get(scripthash).cloned()))
            .collect()
    }

    /// Re-issue the subscribe request for every tracked scripthash in
    /// original order. Tracked state is not modified: replay re-establishes
    /// the server side of subscriptions the manager already carries.
    /// Stops at the first failure and returns it, so resubscription can be
    /// partial; the tracked entries stay intact for a retry.
    pub async fn resubscribe(&self, deadline: Duration) -> Result<(), Error> {
        for scripthash in self.tracked().await {
            self.subscribe_remote(deadline, &scripthash).await?;
        }
        Ok(())
    }
}

/// Consumes every raw scripthash push and forwards only those naming a
/// currently tracked scripthash.
async fn filter(
    mut raw: mpsc::Receiver<RawNotification>,
    tracked: Arc<RwLock<TrackedState>>,
    events: mpsc::Sender<ScripthashNotification>,
) {
    while let Some(note) = raw.recv().await {
        let (scripthash, status): (String, Option<String>) =
            match serde_json::from_value(note.params) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(error = %err, "undecodable scripthash notification; listener stopped");
                    return;
                }
            };

        let interested = tracked
            .read()
            .await
            .scripthashes
            .iter()
            .any(|candidate| *candidate == scripthash);
        if !interested {
            trace!(%scripthash, "notification for untracked scripthash dropped");
            continue;
        }
        if events
            .send(ScripthashNotification { scripthash, status })
            .await
            .is_err()
        {
            return;
        }
    }
}
