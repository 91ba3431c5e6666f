//! WebSocket transport implementation.
//!
//! This module adapts an upgraded axum [`WebSocket`] to the [`Transport`]
//! traits. Pings from the peer are answered by the underlying protocol
//! implementation; they still surface here so callers can treat them as
//! liveness.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{FrameSink, FrameStream, Transport, TransportError, WireFrame};

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

/// An upgraded WebSocket connection.
pub struct WebSocketTransport {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            remote_addr: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Reject inbound messages larger than `size` bytes.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Transport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Stream = WebSocketStream;

    fn split(self) -> (Self::Sink, Self::Stream) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketSink { inner: sink },
            WebSocketStream {
                inner: stream,
                max_message_size: self.max_message_size,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Write half of a [`WebSocketTransport`].
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        self.inner
            .send(into_message(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.send(WireFrame::Close).await?;
        if let Err(e) = self.inner.close().await {
            debug!(error = %e, "WebSocket close after close frame");
        }
        Ok(())
    }
}

/// Read half of a [`WebSocketTransport`].
pub struct WebSocketStream {
    inner: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl FrameStream for WebSocketStream {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        match self.inner.next().await {
            Some(Ok(message)) => from_message(message, self.max_message_size).map(Some),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

fn into_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Ping => Message::Ping(Vec::new()),
        WireFrame::Pong => Message::Pong(Vec::new()),
        WireFrame::Close => Message::Close(None),
    }
}

fn from_message(message: Message, max_message_size: usize) -> Result<WireFrame, TransportError> {
    match message {
        Message::Text(text) => {
            check_size(text.len(), max_message_size)?;
            Ok(WireFrame::Text(text))
        }
        Message::Binary(data) => {
            // Binary frames are accepted for clients that cannot send text.
            check_size(data.len(), max_message_size)?;
            Ok(WireFrame::Text(String::from_utf8_lossy(&data).into_owned()))
        }
        Message::Ping(_) => Ok(WireFrame::Ping),
        Message::Pong(_) => Ok(WireFrame::Pong),
        Message::Close(_) => {
            debug!("Received close frame");
            Ok(WireFrame::Close)
        }
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), TransportError> {
    if size > limit {
        warn!(size, limit, "Message too large");
        return Err(TransportError::FrameTooLarge { size, limit });
    }
    Ok(())
}
