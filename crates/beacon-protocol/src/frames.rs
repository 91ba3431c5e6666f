//! Frame types for the Beacon protocol.
//!
//! Inbound frames are plain JSON objects whose shape depends on the role of
//! the sending connection. Outbound frames are always wrapped in an
//! [`Envelope`], which serializes as `{"type": <tag>, "payload": <body>}`.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A driver's position at a point in time.
///
/// Every field is optional on the wire; absent or `null` fields read as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// Publisher identity. Always overwritten server-side.
    #[serde(default, deserialize_with = "null_as_default")]
    pub driver_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub latitude: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub longitude: f64,
    /// Heading in degrees.
    #[serde(default, deserialize_with = "null_as_default")]
    pub heading: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub speed: f64,
    /// Milliseconds since epoch. Zero means the client did not supply one.
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: u64,
}

impl LocationUpdate {
    /// Create a new update stamped with the current time.
    #[must_use]
    pub fn new(driver_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            driver_id: driver_id.into(),
            latitude,
            longitude,
            heading: 0.0,
            speed: 0.0,
            timestamp: now_millis(),
        }
    }

    /// Set heading and speed.
    #[must_use]
    pub fn with_motion(mut self, heading: f64, speed: f64) -> Self {
        self.heading = heading;
        self.speed = speed;
        self
    }

    /// Set an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Bind the update to an authenticated publisher identity and fill in a
    /// server timestamp when the client left it out.
    #[must_use]
    pub fn attributed_to(mut self, driver_id: &str) -> Self {
        self.driver_id = driver_id.to_string();
        if self.timestamp == 0 {
            self.timestamp = now_millis();
        }
        self
    }
}

/// What a subscriber wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionAction {
    /// Parse the wire name of an action.
    #[must_use]
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }
}

/// A subscriber's request to start or stop following a driver.
///
/// `action` is kept as the raw string so unknown actions decode successfully
/// and can be reported by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub action: String,
    pub driver_id: String,
}

impl SubscriptionRequest {
    /// Create a subscribe request.
    #[must_use]
    pub fn subscribe(driver_id: impl Into<String>) -> Self {
        Self {
            action: "subscribe".to_string(),
            driver_id: driver_id.into(),
        }
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub fn unsubscribe(driver_id: impl Into<String>) -> Self {
        Self {
            action: "unsubscribe".to_string(),
            driver_id: driver_id.into(),
        }
    }

    /// The parsed action, if it is one the hub understands.
    #[must_use]
    pub fn action(&self) -> Option<SubscriptionAction> {
        SubscriptionAction::parse(&self.action)
    }
}

/// Greeting sent once right after a connection is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rider_id: Option<String>,
}

impl Welcome {
    /// Welcome for a publisher connection.
    #[must_use]
    pub fn driver(driver_id: impl Into<String>) -> Self {
        Self {
            message: "Driver connected successfully".to_string(),
            driver_id: Some(driver_id.into()),
            rider_id: None,
        }
    }

    /// Welcome for a subscriber connection.
    #[must_use]
    pub fn rider(rider_id: impl Into<String>) -> Self {
        Self {
            message: "Rider connected successfully".to_string(),
            driver_id: None,
            rider_id: Some(rider_id.into()),
        }
    }
}

/// Online state of a driver as seen by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub driver_id: String,
    pub is_online: bool,
    /// Milliseconds since epoch at which the status was observed.
    pub last_seen: u64,
}

impl DriverStatus {
    /// Status observed now.
    #[must_use]
    pub fn now(driver_id: impl Into<String>, is_online: bool) -> Self {
        Self {
            driver_id: driver_id.into(),
            is_online,
            last_seen: now_millis(),
        }
    }
}

/// Body of a rejection sent before a connection is admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl ErrorPayload {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// A hub-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    /// Registration succeeded.
    Connected(Welcome),
    /// A driver moved.
    LocationUpdate(LocationUpdate),
    /// A driver came online or went offline.
    DriverStatus(DriverStatus),
}

impl Envelope {
    /// The wire tag of this envelope.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Connected(_) => "connected",
            Envelope::LocationUpdate(_) => "location_update",
            Envelope::DriverStatus(_) => "driver_status",
        }
    }
}
