//! Header policy: how many leading payload bytes stay untransformed
//!
//! Keeping the codec header in the clear lets an intermediary classify frames
//! (key frame detection, Opus mode) without inverting the payload transform,
//! and keeps decoders from failing hard on transformed media. Offsets follow
//! the VP8 uncompressed data chunk (10 bytes for key frames, 3 for delta
//! frames) and the Opus TOC byte (1 byte).

use crate::data::frame::FrameType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Untransformed prefix for key frames
pub const KEY_FRAME_HEADER_LEN: usize = 10;

/// Untransformed prefix for delta frames
pub const DELTA_FRAME_HEADER_LEN: usize = 3;

/// Untransformed prefix for undifferentiated frames and unknown labels
pub const DEFAULT_HEADER_LEN: usize = 1;

/// Immutable mapping from frame type to untransformed prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPolicy {
    key: usize,
    delta: usize,
    default: usize,
}

impl HeaderPolicy {
    /// Standard VP8/Opus offsets
    pub const STANDARD: HeaderPolicy = HeaderPolicy {
        key: KEY_FRAME_HEADER_LEN,
        delta: DELTA_FRAME_HEADER_LEN,
        default: DEFAULT_HEADER_LEN,
    };

    /// Build a policy with custom offsets
    pub fn new(key: usize, delta: usize, default: usize) -> Self {
        Self {
            key,
            delta,
            default,
        }
    }

    /// Number of leading bytes to leave untransformed for a frame type
    pub fn header_len(&self, frame_type: FrameType) -> usize {
        match frame_type {
            FrameType::Key => self.key,
            FrameType::Delta => self.delta,
            FrameType::Undifferentiated => self.default,
        }
    }

    /// Same as [`header_len`](Self::header_len) for a raw encoder label
    ///
    /// Unrecognised or missing labels resolve to the default offset.
    pub fn header_len_for_label(&self, label: Option<&str>) -> usize {
        self.header_len(FrameType::from_label(label))
    }

    /// Header length clamped to the payload being processed
    pub fn clamped_header_len(&self, frame_type: FrameType, payload_len: usize) -> usize {
        self.header_len(frame_type).min(payload_len)
    }

    /// Reject policies that would leave nothing to classify a frame by
    pub fn validate(&self) -> Result<()> {
        if self.default == 0 {
            return Err(Error::ConfigError(
                "default header length must be at least 1 byte".to_string(),
            ));
        }
        if self.delta > self.key {
            return Err(Error::ConfigError(format!(
                "delta header length ({}) must not exceed key header length ({})",
                self.delta, self.key
            )));
        }
        Ok(())
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_offsets() {
        let policy = HeaderPolicy::default();
        assert_eq!(policy.header_len(FrameType::Key), 10);
        assert_eq!(policy.header_len(FrameType::Delta), 3);
        assert_eq!(policy.header_len(FrameType::Undifferentiated), 1);
    }

    #[test]
    fn test_unknown_label_uses_default() {
        let policy = HeaderPolicy::STANDARD;
        assert_eq!(policy.header_len_for_label(Some("key")), 10);
        assert_eq!(policy.header_len_for_label(Some("delta")), 3);
        assert_eq!(policy.header_len_for_label(None), 1);
        assert_eq!(policy.header_len_for_label(Some("svc-layer")), 1);
        assert_eq!(policy.header_len_for_label(Some("")), 1);
    }

    #[test]
    fn test_clamped_to_payload() {
        let policy = HeaderPolicy::STANDARD;
        assert_eq!(policy.clamped_header_len(FrameType::Key, 4), 4);
        assert_eq!(policy.clamped_header_len(FrameType::Key, 0), 0);
        assert_eq!(policy.clamped_header_len(FrameType::Delta, 200), 3);
    }

    #[test]
    fn test_validate() {
        assert!(HeaderPolicy::STANDARD.validate().is_ok());
        assert!(HeaderPolicy::new(10, 3, 0).validate().is_err());
        assert!(HeaderPolicy::new(2, 3, 1).validate().is_err());
    }
}
