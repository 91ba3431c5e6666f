//! Last known location per publisher.

use beacon_protocol::LocationUpdate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

/// Publisher identity → most recent [`LocationUpdate`].
///
/// Entries outlive the publisher's connection. An update older than the
/// cached one is ignored; equal timestamps take the later arrival.
#[derive(Debug, Default)]
pub struct LocationCache {
    latest: DashMap<String, LocationUpdate>,
}

impl LocationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update.
    ///
    /// Returns `true` if it replaced the cached entry.
    pub fn record(&self, update: &LocationUpdate) -> bool {
        match self.latest.entry(update.driver_id.clone()) {
            Entry::Occupied(mut entry) => {
                if update.timestamp < entry.get().timestamp {
                    trace!(
                        driver = %update.driver_id,
                        cached = entry.get().timestamp,
                        received = update.timestamp,
                        "Ignoring out-of-order location"
                    );
                    return false;
                }
                entry.insert(update.clone());
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(update.clone());
                true
            }
        }
    }

    /// Latest location for a publisher.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<LocationUpdate> {
        self.latest.get(identity).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
