//! Subscription index.
//!
//! Maps each publisher identity to the subscriber connections following it,
//! plus the reverse mapping so a departing subscriber can be removed without
//! scanning every publisher. Owned and mutated only by the hub event loop.

use crate::peer::ConnectionId;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Publisher identity → subscribers, and subscriber → publisher identities.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_publisher: HashMap<String, HashSet<ConnectionId>>,
    by_subscriber: HashMap<ConnectionId, HashSet<String>>,
}

impl SubscriptionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription.
    ///
    /// Returns `true` if it did not already exist.
    pub fn subscribe(&mut self, subscriber: ConnectionId, publisher: &str) -> bool {
        let added = self
            .by_publisher
            .entry(publisher.to_string())
            .or_default()
            .insert(subscriber);
        self.by_subscriber
            .entry(subscriber)
            .or_default()
            .insert(publisher.to_string());

        if added {
            debug!(connection = %subscriber, driver = %publisher, "Subscribed");
        }
        added
    }

    /// Remove a subscription, pruning empty sets.
    ///
    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&mut self, subscriber: ConnectionId, publisher: &str) -> bool {
        let removed = match self.by_publisher.get_mut(publisher) {
            Some(subscribers) => {
                let removed = subscribers.remove(&subscriber);
                if subscribers.is_empty() {
                    self.by_publisher.remove(publisher);
                }
                removed
            }
            None => false,
        };

        if let Some(publishers) = self.by_subscriber.get_mut(&subscriber) {
            publishers.remove(publisher);
            if publishers.is_empty() {
                self.by_subscriber.remove(&subscriber);
            }
        }

        if removed {
            debug!(connection = %subscriber, driver = %publisher, "Unsubscribed");
        }
        removed
    }

    /// Remove every subscription held by `subscriber`.
    ///
    /// Returns the number of subscriptions removed.
    pub fn remove_subscriber(&mut self, subscriber: ConnectionId) -> usize {
        let Some(publishers) = self.by_subscriber.remove(&subscriber) else {
            return 0;
        };

        for publisher in &publishers {
            if let Some(subscribers) = self.by_publisher.get_mut(publisher) {
                subscribers.remove(&subscriber);
                if subscribers.is_empty() {
                    self.by_publisher.remove(publisher);
                }
            }
        }

        debug!(connection = %subscriber, count = publishers.len(), "Removed all subscriptions");
        publishers.len()
    }

    /// Subscribers of a publisher.
    pub fn subscribers(&self, publisher: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.by_publisher
            .get(publisher)
            .into_iter()
            .flat_map(|subscribers| subscribers.iter().copied())
    }

    /// Number of subscribers of a publisher.
    #[must_use]
    pub fn subscriber_count(&self, publisher: &str) -> usize {
        self.by_publisher.get(publisher).map_or(0, HashSet::len)
    }

    /// Total number of (subscriber, publisher) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_subscriber.values().map(HashSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_subscriber.is_empty()
    }
}
