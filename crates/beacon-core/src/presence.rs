//! Presence tracking for publishers.
//!
//! Records which publisher identities currently have a live connection.
//! Written only by the hub event loop; read concurrently by status queries.

use crate::peer::ConnectionId;
use beacon_protocol::now_millis;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Presence state for one online publisher.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceState {
    /// Connection currently serving this identity.
    pub connection_id: ConnectionId,
    /// When that connection registered, in epoch milliseconds.
    pub connected_at: u64,
}

impl PresenceState {
    #[must_use]
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            connected_at: now_millis(),
        }
    }
}

/// Publisher identity → live connection.
#[derive(Debug, Default)]
pub struct PublisherRegistry {
    online: DashMap<String, PresenceState>,
}

impl PublisherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `identity` as served by `connection_id`.
    ///
    /// Returns the connection previously serving that identity, if any.
    pub fn join(&self, identity: &str, connection_id: ConnectionId) -> Option<ConnectionId> {
        let previous = self
            .online
            .insert(identity.to_string(), PresenceState::new(connection_id))
            .map(|state| state.connection_id);
        debug!(driver = %identity, connection = %connection_id, "Presence: publisher joined");
        previous
    }

    /// Remove `identity` if it is still served by `connection_id`.
    ///
    /// Returns `true` if the identity went offline.
    pub fn leave(&self, identity: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .online
            .remove_if(identity, |_, state| state.connection_id == connection_id)
            .is_some();
        if removed {
            debug!(driver = %identity, connection = %connection_id, "Presence: publisher left");
        }
        removed
    }

    /// Check if a publisher is online.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.online.contains_key(identity)
    }

    /// Get the presence state for a publisher.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<PresenceState> {
        self.online.get(identity).map(|entry| entry.value().clone())
    }

    /// Identities of all online publishers, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.online.iter().map(|e| e.key().clone()).collect();
        identities.sort();
        identities
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.online.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}
