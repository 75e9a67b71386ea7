//! Frame transforms
//!
//! A [`FrameTransform`] is the pluggable payload function applied to encoded
//! frames in flight. Implementations must keep the leading header bytes named
//! by the [`HeaderPolicy`] untouched, and `inverse(forward(f))` must equal `f`.

pub mod header_policy;
pub mod pipeline;
pub mod shift;

use crate::data::frame::EncodedFrame;
use crate::Result;

pub use header_policy::{
    HeaderPolicy, DEFAULT_HEADER_LEN, DELTA_FRAME_HEADER_LEN, KEY_FRAME_HEADER_LEN,
};
pub use pipeline::{Direction, TransformPipeline, TransformStats, TransformStatsSnapshot};
pub use shift::{ShiftTransform, TRAILER_LEN, TRAILER_MAGIC};

/// Reversible per-frame payload transform
///
/// Implementations hold no per-stream mutable state, so one instance may back
/// several pipelines.
pub trait FrameTransform: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Transform a frame before it leaves a sender (total)
    fn forward(&self, frame: EncodedFrame) -> EncodedFrame;

    /// Undo [`forward`](Self::forward) on a received frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::FramingCorruption`](crate::Error::FramingCorruption)
    /// when the frame cannot have been produced by `forward`.
    fn inverse(&self, frame: EncodedFrame) -> Result<EncodedFrame>;
}
