//! Serialization for change-feed frames.
//!
//! The event bus carries opaque byte frames; each frame is one
//! postcard-encoded [`ChangeEvent`].

use crate::event::ChangeEvent;

/// Maximum accepted frame size in bytes (64 KB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    Oversized {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Encodes a [`ChangeEvent`] into a frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized,
/// or `CodecError::Oversized` if the encoded frame exceeds [`MAX_FRAME_SIZE`].
pub fn encode(event: &ChangeEvent) -> Result<Vec<u8>, CodecError> {
    let frame =
        postcard::to_allocvec(event).map_err(|e| CodecError::Serialization(e.to_string()))?;
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::Oversized {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(frame)
}

/// Decodes a [`ChangeEvent`] from a frame.
///
/// # Errors
///
/// Returns `CodecError::Oversized` before attempting to decode a frame above
/// [`MAX_FRAME_SIZE`], or `CodecError::Serialization` if the bytes cannot be
/// deserialized.
pub fn decode(frame: &[u8]) -> Result<ChangeEvent, CodecError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::Oversized {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    postcard::from_bytes(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}
