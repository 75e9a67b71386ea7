//! Encoded frame data structures
//!
//! - EncodedFrame: one encoded media unit with its classification and metadata
//! - Codec header parsers for the bytes the header policy leaves in the clear

pub mod bitstream;
pub mod frame;

pub use bitstream::{OpusBandwidth, OpusMode, OpusToc, Vp8FrameHeader};
pub use frame::{EncodedFrame, FrameMetadata, FrameType, MediaKind};
