//! Codec for encoding and decoding Beacon frames.
//!
//! Frames are JSON documents carried in WebSocket text messages, so there is
//! no length prefix; the transport delimits messages.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a frame to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is larger than [`MAX_FRAME_SIZE`] or is not
/// valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}
