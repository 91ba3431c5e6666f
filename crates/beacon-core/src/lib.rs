//! # beacon-core
//!
//! Connection and hub actors for the Beacon location hub.
//!
//! This crate provides the moving parts between a transport and the wire
//! protocol:
//!
//! - **Connection** - per-client actor with read and write pumps
//! - **Hub** - single event loop owning registration, subscriptions and fan-out
//! - **Factory** - routes an accepted transport to a publisher or subscriber connection
//! - **Presence** / **Location** - concurrent read models for status queries
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  events   ┌─────────────┐  envelopes  ┌─────────────┐
//! │  Connection │──────────▶│     Hub     │────────────▶│   Outbox    │
//! │ (read pump) │           └─────────────┘             └─────────────┘
//! └─────────────┘            │          │                      │
//!                            ▼          ▼                      ▼
//!                     ┌──────────┐ ┌──────────┐        ┌─────────────┐
//!                     │ Presence │ │ Location │        │ Connection  │
//!                     └──────────┘ └──────────┘        │(write pump) │
//!                                                      └─────────────┘
//! ```

pub mod connection;
pub mod factory;
pub mod hub;
pub mod location;
pub mod metrics;
pub mod outbox;
pub mod peer;
pub mod presence;
pub mod subscription;

pub use connection::{Connection, ConnectionConfig};
pub use factory::{AcceptError, ConnectionFactory};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats, PublisherStatus};
pub use location::LocationCache;
pub use outbox::{Delivery, Outbox};
pub use peer::{validate_identity, ConnectionId, Peer, Role};
pub use presence::{PresenceState, PublisherRegistry};
pub use subscription::SubscriptionIndex;
