//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon location hub.
//!
//! Every frame on the wire is a WebSocket text frame carrying JSON:
//!
//! - Publishers send bare [`LocationUpdate`] objects
//! - Subscribers send [`SubscriptionRequest`] objects
//! - The hub answers with [`Envelope`]s (`{"type": ..., "payload": ...}`)
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Envelope, LocationUpdate};
//!
//! let update: LocationUpdate =
//!     codec::decode(r#"{"latitude": 6.9, "longitude": 79.8}"#).unwrap();
//! let text = codec::encode(&Envelope::LocationUpdate(update)).unwrap();
//! assert!(text.starts_with(r#"{"type":"location_update""#));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{
    now_millis, DriverStatus, Envelope, ErrorPayload, LocationUpdate, SubscriptionAction,
    SubscriptionRequest, Welcome,
};
