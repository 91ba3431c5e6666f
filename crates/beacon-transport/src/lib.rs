//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon location hub.
//!
//! - **WebSocket** - upgraded axum sockets, the production transport
//! - **Memory** - in-process channel pairs
//!
//! ## Transport Abstraction
//!
//! Every transport splits into a [`FrameSink`] and a [`FrameStream`], so the
//! read and write sides of a connection can be driven by separate tasks.
//!
//! ```rust,ignore
//! use beacon_transport::{FrameStream, Transport};
//!
//! async fn drain(transport: impl Transport) {
//!     let (_sink, mut stream) = transport.split();
//!     while let Ok(Some(frame)) = stream.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryClient, MemoryTransport};
pub use traits::{FrameSink, FrameStream, Transport, TransportError, WireFrame};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
