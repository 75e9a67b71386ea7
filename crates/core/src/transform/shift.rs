//! Partial additive-shift payload transform
//!
//! Forward: header bytes copied, every following byte shifted by `+shift`
//! (mod 256), then a fixed 5-byte trailer appended. Inverse: trailer checked
//! and removed, same header bytes copied, remaining bytes shifted by `-shift`.
//!
//! This is not encryption. It demonstrates the partial-coverage contract any
//! real payload cipher plugged in through [`FrameTransform`] has to keep.

use super::{FrameTransform, HeaderPolicy};
use crate::config::TransformConfig;
use crate::data::frame::EncodedFrame;
use crate::{Error, Result};

/// Marker prefix of the trailer appended by [`ShiftTransform::forward`]
pub const TRAILER_MAGIC: [u8; 4] = *b"FRLY";

/// Number of bytes the forward transform appends to each payload
pub const TRAILER_LEN: usize = TRAILER_MAGIC.len() + 1;

/// Reversible byte-shift transform with an untransformed header prefix
#[derive(Debug, Clone)]
pub struct ShiftTransform {
    policy: HeaderPolicy,
    shift: u8,
    trailer: [u8; TRAILER_LEN],
}

impl ShiftTransform {
    /// Create a transform from a validated configuration
    pub fn new(config: &TransformConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: &TransformConfig) -> Self {
        let mut trailer = [0u8; TRAILER_LEN];
        trailer[..TRAILER_MAGIC.len()].copy_from_slice(&TRAILER_MAGIC);
        trailer[TRAILER_MAGIC.len()] = config.shift;

        Self {
            policy: config.header_policy,
            shift: config.shift,
            trailer,
        }
    }

    /// Header policy in use
    pub fn policy(&self) -> &HeaderPolicy {
        &self.policy
    }

    /// Shift amount in use
    pub fn shift(&self) -> u8 {
        self.shift
    }
}

impl Default for ShiftTransform {
    fn default() -> Self {
        Self::from_config(&TransformConfig::default())
    }
}

impl FrameTransform for ShiftTransform {
    fn name(&self) -> &str {
        "shift"
    }

    fn forward(&self, frame: EncodedFrame) -> EncodedFrame {
        let payload = frame.data.as_ref();
        let header_len = self.policy.clamped_header_len(frame.frame_type, payload.len());

        let mut out = Vec::with_capacity(payload.len() + TRAILER_LEN);
        out.extend_from_slice(&payload[..header_len]);
        out.extend(
            payload[header_len..]
                .iter()
                .map(|b| b.wrapping_add(self.shift)),
        );
        out.extend_from_slice(&self.trailer);

        frame.with_data(out)
    }

    fn inverse(&self, frame: EncodedFrame) -> Result<EncodedFrame> {
        let payload = frame.data.as_ref();

        let body_len = payload
            .len()
            .checked_sub(TRAILER_LEN)
            .ok_or_else(|| Error::framing("payload shorter than trailer", payload.len()))?;

        if payload[body_len..] != self.trailer {
            return Err(Error::framing(
                "trailer does not match this transform",
                payload.len(),
            ));
        }

        let body = &payload[..body_len];
        let header_len = self.policy.clamped_header_len(frame.frame_type, body_len);

        let mut out = Vec::with_capacity(body_len);
        out.extend_from_slice(&body[..header_len]);
        out.extend(body[header_len..].iter().map(|b| b.wrapping_sub(self.shift)));

        Ok(frame.with_data(out))
    }
}
