//! Transport abstraction traits for Beacon.
//!
//! A transport is a duplex, message-oriented connection that can be split
//! into an independently owned read half and write half, so the inbound and
//! outbound pumps of a connection can run on different tasks.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// A single transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// A text frame carrying one JSON document.
    Text(String),
    /// Keepalive probe.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Orderly shutdown.
    Close,
}

impl WireFrame {
    /// Returns the text body if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireFrame::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFrame::Text(text) => write!(f, "text({} bytes)", text.len()),
            WireFrame::Ping => f.write_str("ping"),
            WireFrame::Pong => f.write_str("pong"),
            WireFrame::Close => f.write_str("close"),
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound frame exceeded the size limit.
    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
}

/// The write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame.
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError>;

    /// Send a close frame and shut the write half down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The read half of a transport.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the peer went away without a close frame.
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError>;
}

/// A duplex connection that can be split into its two halves.
pub trait Transport: Send + 'static {
    type Sink: FrameSink + 'static;
    type Stream: FrameStream + 'static;

    /// Split into write and read halves.
    fn split(self) -> (Self::Sink, Self::Stream);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
