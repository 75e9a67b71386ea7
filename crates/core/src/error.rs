//! Error types for FrameRelay core

use thiserror::Error;

/// Result type alias for FrameRelay core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the FrameRelay core
#[derive(Debug, Error)]
pub enum Error {
    /// The inverse transform found a frame whose framing cannot have been
    /// produced by the matching forward transform
    #[error("Framing corruption: {reason} (payload length {payload_len})")]
    FramingCorruption {
        /// What was wrong with the frame
        reason: String,
        /// Length of the rejected payload
        payload_len: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input data
    #[error("Invalid data: {0}")]
    InvalidData(String),

}

impl Error {
    /// Build a framing-corruption error
    pub fn framing(reason: impl Into<String>, payload_len: usize) -> Self {
        Error::FramingCorruption {
            reason: reason.into(),
            payload_len,
        }
    }

    /// Per-frame errors drop the frame but never end the stream
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Error::FramingCorruption { .. } | Error::InvalidData(_))
    }
}
