//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns the server side of a connection and a
//! [`MemoryClient`] that plays the remote peer. Used to drive connections
//! without sockets, e.g. in tests and benchmarks.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameStream, Transport, TransportError, WireFrame};

/// Server side of an in-memory connection.
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<WireFrame>,
    outbound: mpsc::UnboundedSender<WireFrame>,
}

impl MemoryTransport {
    /// Create a connected transport/client pair.
    #[must_use]
    pub fn pair() -> (Self, MemoryClient) {
        let (client_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, client_rx) = mpsc::unbounded_channel();
        (
            Self { inbound, outbound },
            MemoryClient {
                tx: client_tx,
                rx: client_rx,
            },
        )
    }
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn split(self) -> (Self::Sink, Self::Stream) {
        (
            MemorySink {
                outbound: self.outbound,
                closed: false,
            },
            MemoryStream {
                inbound: self.inbound,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Write half of a [`MemoryTransport`].
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<WireFrame>,
    closed: bool,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        let result = self.send(WireFrame::Close).await;
        self.closed = true;
        result
    }
}

/// Read half of a [`MemoryTransport`].
pub struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<WireFrame>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        Ok(self.inbound.recv().await)
    }
}

/// The remote peer of a [`MemoryTransport`].
///
/// Dropping the client ends the server's read stream.
pub struct MemoryClient {
    tx: mpsc::UnboundedSender<WireFrame>,
    rx: mpsc::UnboundedReceiver<WireFrame>,
}

impl MemoryClient {
    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(WireFrame::Text(text.into()))
    }

    /// Send a close frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn close(&self) -> Result<(), TransportError> {
        self.send(WireFrame::Close)
    }

    /// Wait for the next frame from the server.
    ///
    /// Returns `None` once the server side has been dropped.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.rx.recv().await
    }

    /// Wait for the next text frame, skipping keepalive frames.
    ///
    /// Returns `None` on close or once the server side has been dropped.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                WireFrame::Text(text) => return Some(text),
                WireFrame::Ping | WireFrame::Pong => continue,
                WireFrame::Close => return None,
            }
        }
    }

    /// Take a frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.rx.try_recv().ok()
    }
}
