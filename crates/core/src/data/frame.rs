//! Encoded media frames as seen by a frame transform
//!
//! An [`EncodedFrame`] is one unit of encoded media (a video picture or an
//! audio packet) taken from a sender after encoding or from a receiver before
//! decoding. The transform layer only ever rewrites [`EncodedFrame::data`];
//! the classification and [`FrameMetadata`] belong to the transport and pass
//! through untouched.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track (Opus)
    Audio,
    /// Video track (VP8/VP9/H.264)
    Video,
}

impl MediaKind {
    /// SDP media type token (`m=audio` / `m=video`)
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame type classification
///
/// Video encoders label each frame as a key frame or a delta frame. Audio
/// frames carry no label and are `Undifferentiated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Key frame (I-frame), decodable on its own
    Key,
    /// Delta frame (P/B-frame), depends on earlier frames
    Delta,
    /// No video classification (audio, or a label we do not recognise)
    Undifferentiated,
}

impl FrameType {
    /// Classify a frame from the label reported by the encoder
    ///
    /// Only `"key"` and `"delta"` are recognised; anything else, including a
    /// missing label, is `Undifferentiated`.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("key") => FrameType::Key,
            Some("delta") => FrameType::Delta,
            _ => FrameType::Undifferentiated,
        }
    }

    /// Label as reported by an encoder, `None` for undifferentiated frames
    pub fn label(&self) -> Option<&'static str> {
        match self {
            FrameType::Key => Some("key"),
            FrameType::Delta => Some("delta"),
            FrameType::Undifferentiated => None,
        }
    }
}

/// Transport-owned frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// RTP timestamp
    pub timestamp: u32,
    /// Per-stream sequence number assigned by the sender
    pub sequence: u64,
    /// Synchronization source of the stream
    pub ssrc: u32,
    /// Negotiated RTP payload type
    pub payload_type: u8,
}

/// One encoded media frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFrame {
    /// Media kind of the track this frame belongs to
    pub kind: MediaKind,

    /// Frame type classification
    pub frame_type: FrameType,

    /// Encoded payload bytes
    pub data: Bytes,

    /// Transport metadata, never modified by transforms
    pub metadata: FrameMetadata,
}

impl EncodedFrame {
    /// Create a video frame
    pub fn video(frame_type: FrameType, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MediaKind::Video,
            frame_type,
            data: data.into(),
            metadata: FrameMetadata::default(),
        }
    }

    /// Create an audio frame (always undifferentiated)
    pub fn audio(data: impl Into<Bytes>) -> Self {
        Self {
            kind: MediaKind::Audio,
            frame_type: FrameType::Undifferentiated,
            data: data.into(),
            metadata: FrameMetadata::default(),
        }
    }

    /// Attach transport metadata
    pub fn with_metadata(mut self, metadata: FrameMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replace the payload, keeping classification and metadata
    pub fn with_data(self, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..self
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this is a video key frame
    pub fn is_key_frame(&self) -> bool {
        self.frame_type == FrameType::Key
    }
}
