//! Codec header inspection
//!
//! Parses the leading bytes of encoded frames that the header policy keeps in
//! the clear:
//!
//! - VP8 uncompressed data chunk (RFC 6386 section 9.1): a 3-byte frame tag,
//!   followed on key frames by a 3-byte start code and two 16-bit dimension
//!   fields. 10 bytes for key frames, 3 bytes for delta frames.
//! - Opus TOC byte (RFC 6716 section 3.1): 1 byte giving mode, bandwidth,
//!   frame duration and channel layout.
//!
//! A middlebox can run these parsers on transformed frames since the header
//! bytes survive the forward transform unchanged.

use crate::data::frame::FrameType;
use crate::{Error, Result};

/// VP8 key frame start code
pub const VP8_START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// Length of the VP8 frame tag
pub const VP8_FRAME_TAG_LEN: usize = 3;

/// Length of the VP8 key frame header (frame tag + start code + dimensions)
pub const VP8_KEY_HEADER_LEN: usize = 10;

/// Parsed VP8 uncompressed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vp8FrameHeader {
    /// Key frame or interframe
    pub frame_type: FrameType,
    /// Reconstruction filter / version number (0-3)
    pub version: u8,
    /// Whether the frame is meant to be displayed
    pub show_frame: bool,
    /// Size of the first data partition in bytes
    pub first_part_size: u32,
    /// Frame width and height, key frames only
    pub dimensions: Option<(u16, u16)>,
}

impl Vp8FrameHeader {
    /// Header for a key frame with the given dimensions
    pub fn key(width: u16, height: u16, first_part_size: u32) -> Self {
        Self {
            frame_type: FrameType::Key,
            version: 0,
            show_frame: true,
            first_part_size,
            dimensions: Some((width & 0x3fff, height & 0x3fff)),
        }
    }

    /// Header for an interframe
    pub fn delta(first_part_size: u32) -> Self {
        Self {
            frame_type: FrameType::Delta,
            version: 0,
            show_frame: true,
            first_part_size,
            dimensions: None,
        }
    }

    /// Parse the header at the start of a VP8 payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < VP8_FRAME_TAG_LEN {
            return Err(Error::InvalidData(format!(
                "VP8 payload too short for frame tag: {} bytes",
                payload.len()
            )));
        }

        let tag = u32::from(payload[0]) | u32::from(payload[1]) << 8 | u32::from(payload[2]) << 16;
        let is_key = tag & 0x1 == 0;
        let version = ((tag >> 1) & 0x7) as u8;
        let show_frame = (tag >> 4) & 0x1 == 1;
        let first_part_size = (tag >> 5) & 0x7_ffff;

        if !is_key {
            return Ok(Self {
                frame_type: FrameType::Delta,
                version,
                show_frame,
                first_part_size,
                dimensions: None,
            });
        }

        if payload.len() < VP8_KEY_HEADER_LEN {
            return Err(Error::InvalidData(format!(
                "VP8 key frame too short for header: {} bytes",
                payload.len()
            )));
        }
        if payload[3..6] != VP8_START_CODE {
            return Err(Error::InvalidData(
                "VP8 key frame is missing the start code".to_string(),
            ));
        }

        let width = u16::from_le_bytes([payload[6], payload[7]]) & 0x3fff;
        let height = u16::from_le_bytes([payload[8], payload[9]]) & 0x3fff;

        Ok(Self {
            frame_type: FrameType::Key,
            version,
            show_frame,
            first_part_size,
            dimensions: Some((width, height)),
        })
    }

    /// Number of header bytes this frame occupies
    pub fn header_len(&self) -> usize {
        match self.frame_type {
            FrameType::Key => VP8_KEY_HEADER_LEN,
            _ => VP8_FRAME_TAG_LEN,
        }
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> Vec<u8> {
        let key_bit = if self.frame_type == FrameType::Key { 0 } else { 1 };
        let tag = key_bit
            | u32::from(self.version & 0x7) << 1
            | u32::from(self.show_frame) << 4
            | (self.first_part_size & 0x7_ffff) << 5;

        let mut out = Vec::with_capacity(self.header_len());
        out.extend_from_slice(&tag.to_le_bytes()[..3]);

        if let (FrameType::Key, Some((width, height))) = (self.frame_type, self.dimensions) {
            out.extend_from_slice(&VP8_START_CODE);
            out.extend_from_slice(&(width & 0x3fff).to_le_bytes());
            out.extend_from_slice(&(height & 0x3fff).to_le_bytes());
        }
        out
    }
}

/// Opus coding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusMode {
    /// SILK-only (speech)
    Silk,
    /// SILK + CELT
    Hybrid,
    /// CELT-only (music, low delay)
    Celt,
}

/// Opus audio bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusBandwidth {
    /// 4 kHz
    Narrowband,
    /// 6 kHz
    Mediumband,
    /// 8 kHz
    Wideband,
    /// 12 kHz
    SuperWideband,
    /// 20 kHz
    Fullband,
}

/// Parsed Opus TOC byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusToc {
    /// Configuration number (0-31)
    pub config: u8,
    /// Stereo flag
    pub stereo: bool,
    /// Frame count code (0-3)
    pub frame_count_code: u8,
}

impl OpusToc {
    /// Build a TOC byte description
    pub fn new(config: u8, stereo: bool, frame_count_code: u8) -> Self {
        Self {
            config: config & 0x1f,
            stereo,
            frame_count_code: frame_count_code & 0x3,
        }
    }

    /// Parse the TOC byte at the start of an Opus packet
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let toc = *payload
            .first()
            .ok_or_else(|| Error::InvalidData("empty Opus packet".to_string()))?;
        Ok(Self::from_byte(toc))
    }

    /// Decode a TOC byte
    pub fn from_byte(toc: u8) -> Self {
        Self {
            config: toc >> 3,
            stereo: (toc >> 2) & 0x1 == 1,
            frame_count_code: toc & 0x3,
        }
    }

    /// Encode as a TOC byte
    pub fn to_byte(&self) -> u8 {
        (self.config << 3) | (u8::from(self.stereo) << 2) | self.frame_count_code
    }

    /// Coding mode selected by the configuration number
    pub fn mode(&self) -> OpusMode {
        match self.config {
            0..=11 => OpusMode::Silk,
            12..=15 => OpusMode::Hybrid,
            _ => OpusMode::Celt,
        }
    }

    /// Audio bandwidth selected by the configuration number
    pub fn bandwidth(&self) -> OpusBandwidth {
        match self.config {
            0..=3 | 16..=19 => OpusBandwidth::Narrowband,
            4..=7 => OpusBandwidth::Mediumband,
            8..=11 | 20..=23 => OpusBandwidth::Wideband,
            12..=13 | 24..=27 => OpusBandwidth::SuperWideband,
            _ => OpusBandwidth::Fullband,
        }
    }

    /// Duration of one Opus frame in microseconds
    pub fn frame_duration_us(&self) -> u32 {
        match self.mode() {
            OpusMode::Silk => [10_000, 20_000, 40_000, 60_000][usize::from(self.config % 4)],
            OpusMode::Hybrid => [10_000, 20_000][usize::from(self.config % 2)],
            OpusMode::Celt => [2_500, 5_000, 10_000, 20_000][usize::from(self.config % 4)],
        }
    }
}
