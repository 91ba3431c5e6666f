//! Connection identity as seen by the hub.

use crate::outbox::Outbox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum identity length in bytes.
pub const MAX_IDENTITY_LENGTH: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique key for one physical connection.
///
/// A client that reconnects gets a new id even if its identity is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Which side of the pub/sub relationship a connection is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sends location updates (a driver).
    Publisher,
    /// Follows publishers (a rider).
    Subscriber,
}

impl Role {
    /// Name of the query parameter carrying this role's identity.
    #[must_use]
    pub fn identity_param(&self) -> &'static str {
        match self {
            Role::Publisher => "driver_id",
            Role::Subscriber => "rider_id",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Publisher => "publisher",
            Role::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a client-supplied identity.
///
/// # Errors
///
/// Returns an error message if the identity is invalid.
pub fn validate_identity(identity: &str) -> Result<(), &'static str> {
    if identity.trim().is_empty() {
        return Err("Identity cannot be empty");
    }
    if identity.len() > MAX_IDENTITY_LENGTH {
        return Err("Identity too long");
    }
    if identity.chars().any(char::is_control) {
        return Err("Identity contains invalid characters");
    }
    Ok(())
}

/// The hub's handle on a registered connection.
///
/// Holds the only producer side of the connection's outbound queue, so
/// dropping the peer closes that queue.
#[derive(Debug)]
pub struct Peer {
    pub id: ConnectionId,
    pub identity: String,
    pub role: Role,
    pub outbox: Outbox,
}

impl Peer {
    #[must_use]
    pub fn new(id: ConnectionId, identity: impl Into<String>, role: Role, outbox: Outbox) -> Self {
        Self {
            id,
            identity: identity.into(),
            role,
            outbox,
        }
    }
}
