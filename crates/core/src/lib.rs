//! FrameRelay core library
//!
//! Transport-agnostic pieces of the frame relay:
//!
//! - [`data`]: the encoded frame model and codec header parsers
//! - [`transform`]: the header policy, the [`FrameTransform`] trait, the
//!   shift transform and the streaming [`TransformPipeline`]
//! - [`config`]: transform configuration
//!
//! # Example
//!
//! ```
//! use framerelay_core::{EncodedFrame, FrameTransform, FrameType, ShiftTransform};
//!
//! let transform = ShiftTransform::default();
//! let frame = EncodedFrame::video(FrameType::Delta, vec![0x31, 0x02, 0x00, 0x10, 0x20]);
//!
//! let sent = transform.forward(frame.clone());
//! // the 3-byte delta frame header survives
//! assert_eq!(&sent.data[..3], &frame.data[..3]);
//!
//! let received = transform.inverse(sent).unwrap();
//! assert_eq!(received, frame);
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod error;
pub mod transform;

pub use config::TransformConfig;
pub use data::{EncodedFrame, FrameMetadata, FrameType, MediaKind};
pub use error::{Error, Result};
pub use transform::{
    Direction, FrameTransform, HeaderPolicy, ShiftTransform, TransformPipeline, TransformStats,
    TransformStatsSnapshot,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
