//! The location hub.
//!
//! The hub owns the connection registry, the subscription index and the
//! last-location cache. Every mutation goes through one event loop
//! ([`Hub::run`]), fed by cloneable [`HubHandle`]s. Status queries read the
//! publisher registry and location cache directly without touching the event
//! stream.

use crate::location::LocationCache;
use crate::metrics;
use crate::peer::{validate_identity, ConnectionId, Peer, Role};
use crate::presence::PublisherRegistry;
use crate::subscription::SubscriptionIndex;
use beacon_protocol::{DriverStatus, Envelope, LocationUpdate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Default hub event queue capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Hub errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The event loop is not running.
    #[error("Location hub is not running")]
    Unavailable,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the event queue feeding the event loop.
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// A consistent snapshot of hub state, taken by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered connections of either role.
    pub connections: usize,
    /// Publisher identities with a live connection.
    pub publishers_online: usize,
    /// Total (subscriber, publisher) pairs.
    pub subscriptions: usize,
}

/// Status of one publisher as reported to status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublisherStatus {
    pub driver_id: String,
    pub is_online: bool,
    /// When the current connection registered, if online.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online_since: Option<u64>,
    /// Last known location, if the publisher ever published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationUpdate>,
}

enum HubEvent {
    Register(Peer),
    Unregister(ConnectionId),
    Publish(LocationUpdate),
    Subscribe {
        connection: ConnectionId,
        publisher: String,
    },
    Unsubscribe {
        connection: ConnectionId,
        publisher: String,
    },
    Stats(oneshot::Sender<HubStats>),
}

/// State readable outside the event loop.
#[derive(Debug, Default)]
struct Shared {
    publishers: PublisherRegistry,
    locations: LocationCache,
    running: AtomicBool,
}

/// Clears the running flag when the event loop ends, including by panic.
struct RunningGuard(Arc<Shared>);

impl RunningGuard {
    fn new(shared: Arc<Shared>) -> Self {
        shared.running.store(true, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// The hub actor. Consumed by [`Hub::run`].
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    shared: Arc<Shared>,
    connections: HashMap<ConnectionId, Peer>,
    subscriptions: SubscriptionIndex,
}

impl Hub {
    /// Create a hub and the handle that feeds it.
    ///
    /// The hub does nothing until [`Hub::run`] is polled.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared::default());
        let hub = Self {
            events: rx,
            shared: Arc::clone(&shared),
            connections: HashMap::new(),
            subscriptions: SubscriptionIndex::new(),
        };
        (hub, HubHandle { events: tx, shared })
    }

    /// Create a hub and spawn its event loop on the current runtime.
    #[must_use]
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(config);
        // Mark running before the task is first polled so callers can query
        // immediately after spawning.
        handle.shared.running.store(true, Ordering::SeqCst);
        tokio::spawn(hub.run());
        handle
    }

    /// Process events until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        let _running = RunningGuard::new(Arc::clone(&self.shared));
        info!("Location hub started");

        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }

        info!("Location hub stopped");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(peer) => self.register(peer),
            HubEvent::Unregister(id) => self.unregister(id),
            HubEvent::Publish(update) => self.publish(update),
            HubEvent::Subscribe {
                connection,
                publisher,
            } => self.subscribe(connection, &publisher),
            HubEvent::Unsubscribe {
                connection,
                publisher,
            } => self.unsubscribe(connection, &publisher),
            HubEvent::Stats(reply) => {
                // The requester may have given up
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, peer: Peer) {
        if self.connections.contains_key(&peer.id) {
            warn!(connection = %peer.id, "Connection already registered");
            return;
        }

        match peer.role {
            Role::Publisher => {
                let previous = self.shared.publishers.join(&peer.identity, peer.id);
                match previous {
                    Some(old) => {
                        // Newest connection wins; dropping the old peer closes
                        // its queue and tears that connection down.
                        if self.connections.remove(&old).is_some() {
                            warn!(
                                driver = %peer.identity,
                                old = %old,
                                new = %peer.id,
                                "Replacing existing driver connection"
                            );
                        }
                    }
                    None => self.notify_status(&peer.identity, true),
                }
                info!(driver = %peer.identity, connection = %peer.id, "Driver connected");
            }
            Role::Subscriber => {
                info!(rider = %peer.identity, connection = %peer.id, "Rider connected");
            }
        }

        self.connections.insert(peer.id, peer);
        self.update_gauges();
    }

    fn unregister(&mut self, id: ConnectionId) {
        let Some(peer) = self.connections.remove(&id) else {
            trace!(connection = %id, "Unregister for unknown connection");
            return;
        };

        match peer.role {
            Role::Publisher => {
                if self.shared.publishers.leave(&peer.identity, id) {
                    self.notify_status(&peer.identity, false);
                }
                info!(driver = %peer.identity, connection = %id, "Driver disconnected");
            }
            Role::Subscriber => {
                self.subscriptions.remove_subscriber(id);
                info!(rider = %peer.identity, connection = %id, "Rider disconnected");
            }
        }

        self.update_gauges();
        // `peer` drops here, closing its outbound queue.
    }

    fn publish(&mut self, update: LocationUpdate) {
        metrics::record_publish();
        self.shared.locations.record(&update);

        let driver = update.driver_id.clone();
        if self.subscriptions.subscriber_count(&driver) == 0 {
            trace!(driver = %driver, "No subscribers for location");
            return;
        }

        let envelope = Envelope::LocationUpdate(update);
        let mut recipients = 0;
        for subscriber in self.subscriptions.subscribers(&driver) {
            if let Some(peer) = self.connections.get(&subscriber) {
                peer.outbox.enqueue(envelope.clone());
                recipients += 1;
            }
        }

        trace!(driver = %driver, recipients, "Broadcast location");
    }

    fn subscribe(&mut self, connection: ConnectionId, publisher: &str) {
        let Some(peer) = self.connections.get(&connection) else {
            debug!(connection = %connection, "Subscribe from unregistered connection ignored");
            return;
        };
        if peer.role != Role::Subscriber {
            warn!(connection = %connection, "Subscribe from driver connection ignored");
            return;
        }
        if let Err(reason) = validate_identity(publisher) {
            warn!(rider = %peer.identity, reason, "Invalid driver id in subscribe");
            return;
        }

        if self.subscriptions.subscribe(connection, publisher) {
            metrics::record_subscription();
        }
        info!(rider = %peer.identity, driver = %publisher, "Rider subscribed to driver");

        if let Some(location) = self.shared.locations.get(publisher) {
            peer.outbox.enqueue(Envelope::LocationUpdate(location));
        }
        let is_online = self.shared.publishers.is_online(publisher);
        peer.outbox
            .enqueue(Envelope::DriverStatus(DriverStatus::now(publisher, is_online)));

        self.update_gauges();
    }

    fn unsubscribe(&mut self, connection: ConnectionId, publisher: &str) {
        if self.subscriptions.unsubscribe(connection, publisher) {
            debug!(connection = %connection, driver = %publisher, "Rider unsubscribed from driver");
            self.update_gauges();
        }
    }

    /// Tell every subscriber of `identity` about its online state.
    fn notify_status(&self, identity: &str, is_online: bool) {
        for subscriber in self.subscriptions.subscribers(identity) {
            if let Some(peer) = self.connections.get(&subscriber) {
                peer.outbox
                    .enqueue(Envelope::DriverStatus(DriverStatus::now(identity, is_online)));
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            publishers_online: self.shared.publishers.count(),
            subscriptions: self.subscriptions.len(),
        }
    }

    fn update_gauges(&self) {
        metrics::set_hub_gauges(self.shared.publishers.count(), self.subscriptions.len());
    }
}

/// Cloneable handle to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    shared: Arc<Shared>,
}

impl HubHandle {
    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.events
            .send(event)
            .await
            .map_err(|_| HubError::Unavailable)
    }

    /// Admit a connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop has stopped.
    pub async fn register(&self, peer: Peer) -> Result<(), HubError> {
        self.submit(HubEvent::Register(peer)).await
    }

    /// Remove a connection. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop has stopped.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.submit(HubEvent::Unregister(id)).await
    }

    /// Cache a location and fan it out to the publisher's subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop has stopped.
    pub async fn publish(&self, update: LocationUpdate) -> Result<(), HubError> {
        self.submit(HubEvent::Publish(update)).await
    }

    /// Start following `publisher`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop has stopped.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        publisher: impl Into<String>,
    ) -> Result<(), HubError> {
        self.submit(HubEvent::Subscribe {
            connection,
            publisher: publisher.into(),
        })
        .await
    }

    /// Stop following `publisher`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop has stopped.
    pub async fn unsubscribe(
        &self,
        connection: ConnectionId,
        publisher: impl Into<String>,
    ) -> Result<(), HubError> {
        self.submit(HubEvent::Unsubscribe {
            connection,
            publisher: publisher.into(),
        })
        .await
    }

    /// Snapshot of hub state, ordered after every event this handle has
    /// already submitted.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubEvent::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Unavailable)
    }

    /// Whether the event loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), HubError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(HubError::Unavailable)
        }
    }

    /// Identities of all online publishers.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop is not running.
    pub fn online_publishers(&self) -> Result<Vec<String>, HubError> {
        self.ensure_running()?;
        Ok(self.shared.publishers.identities())
    }

    /// Whether a publisher currently has a live connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop is not running.
    pub fn is_online(&self, identity: &str) -> Result<bool, HubError> {
        self.ensure_running()?;
        Ok(self.shared.publishers.is_online(identity))
    }

    /// Last cached location of a publisher.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop is not running.
    pub fn last_location(&self, identity: &str) -> Result<Option<LocationUpdate>, HubError> {
        self.ensure_running()?;
        Ok(self.shared.locations.get(identity))
    }

    /// Online state and last location of a publisher.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the event loop is not running.
    pub fn status(&self, identity: &str) -> Result<PublisherStatus, HubError> {
        self.ensure_running()?;
        let presence = self.shared.publishers.get(identity);
        Ok(PublisherStatus {
            driver_id: identity.to_string(),
            is_online: presence.is_some(),
            online_since: presence.map(|p| p.connected_at),
            location: self.shared.locations.get(identity),
        })
    }
}
