//! Codec table of the loopback substrate
//!
//! Payload type numbers follow what browsers commonly offer. Video RED is
//! offered as `red/90000`, which is what the default offer rewrite renames.

use crate::sdp::RtpMap;
use framerelay_core::MediaKind;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// A codec the loopback endpoints can send and receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCodec {
    /// Media kind
    pub kind: MediaKind,
    /// Payload type used in our own offers
    pub payload_type: u8,
    /// Encoding name as written in rtpmap
    pub encoding: &'static str,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Channel count (audio)
    pub channels: Option<u16>,
    /// fmtp parameters
    pub fmtp: Option<&'static str>,
}

/// Every codec, in default preference order per kind
pub static CODECS: [LocalCodec; 7] = [
    LocalCodec {
        kind: MediaKind::Audio,
        payload_type: 111,
        encoding: "opus",
        clock_rate: 48_000,
        channels: Some(2),
        fmtp: Some("minptime=10;useinbandfec=1"),
    },
    LocalCodec {
        kind: MediaKind::Audio,
        payload_type: 63,
        encoding: "red",
        clock_rate: 48_000,
        channels: Some(2),
        fmtp: Some("111/111"),
    },
    LocalCodec {
        kind: MediaKind::Video,
        payload_type: 96,
        encoding: "VP8",
        clock_rate: 90_000,
        channels: None,
        fmtp: None,
    },
    LocalCodec {
        kind: MediaKind::Video,
        payload_type: 98,
        encoding: "VP9",
        clock_rate: 90_000,
        channels: None,
        fmtp: Some("profile-id=0"),
    },
    LocalCodec {
        kind: MediaKind::Video,
        payload_type: 102,
        encoding: "H264",
        clock_rate: 90_000,
        channels: None,
        fmtp: Some("level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"),
    },
    LocalCodec {
        kind: MediaKind::Video,
        payload_type: 116,
        encoding: "red",
        clock_rate: 90_000,
        channels: None,
        fmtp: None,
    },
    LocalCodec {
        kind: MediaKind::Video,
        payload_type: 117,
        encoding: "ulpfec",
        clock_rate: 90_000,
        channels: None,
        fmtp: None,
    },
];

impl LocalCodec {
    /// `kind/encoding` mime type
    pub fn mime_type(&self) -> String {
        match (self.kind, self.encoding) {
            (MediaKind::Audio, "opus") => MIME_TYPE_OPUS.to_string(),
            (MediaKind::Video, "VP8") => MIME_TYPE_VP8.to_string(),
            (MediaKind::Video, "VP9") => MIME_TYPE_VP9.to_string(),
            (MediaKind::Video, "H264") => MIME_TYPE_H264.to_string(),
            (kind, encoding) => format!("{}/{}", kind, encoding),
        }
    }

    /// Whether this carries media (as opposed to redundancy or FEC)
    pub fn is_media(&self) -> bool {
        !matches!(self.encoding, "red" | "ulpfec" | "rtx")
    }

    /// rtpmap value for a payload type
    pub fn rtpmap(&self, payload_type: u8) -> String {
        match self.channels {
            Some(ch) => format!(
                "{} {}/{}/{}",
                payload_type, self.encoding, self.clock_rate, ch
            ),
            None => format!("{} {}/{}", payload_type, self.encoding, self.clock_rate),
        }
    }

    /// Whether a remote rtpmap names this codec
    pub fn matches(&self, map: &RtpMap) -> bool {
        map.encoding.eq_ignore_ascii_case(self.encoding) && map.clock_rate == self.clock_rate
    }

    /// Capability as reported to links
    pub fn capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type(),
            clock_rate: self.clock_rate,
            channels: self.channels.unwrap_or(0),
            sdp_fmtp_line: self.fmtp.unwrap_or_default().to_string(),
            rtcp_feedback: vec![],
        }
    }
}

/// Codecs of a kind in default order
pub fn codecs_for(kind: MediaKind) -> impl Iterator<Item = &'static LocalCodec> {
    CODECS.iter().filter(move |c| c.kind == kind)
}

/// Look up a codec by mime type (case-insensitive)
pub fn find_by_mime(kind: MediaKind, mime_type: &str) -> Option<&'static LocalCodec> {
    codecs_for(kind).find(|c| c.mime_type().eq_ignore_ascii_case(mime_type))
}

/// Local codec matching a remote rtpmap
pub fn find_for_rtpmap(kind: MediaKind, map: &RtpMap) -> Option<&'static LocalCodec> {
    codecs_for(kind).find(|c| c.matches(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_capabilities_include_red() {
        let mimes: Vec<String> = codecs_for(MediaKind::Video).map(|c| c.mime_type()).collect();
        assert_eq!(mimes[0], "video/VP8");
        assert!(mimes.contains(&"video/red".to_string()));
        assert!(codecs_for(MediaKind::Video).any(|c| c.rtpmap(c.payload_type) == "116 red/90000"));
    }

    #[test]
    fn test_find_by_mime() {
        assert_eq!(
            find_by_mime(MediaKind::Video, "video/vp9").map(|c| c.payload_type),
            Some(98)
        );
        assert!(find_by_mime(MediaKind::Video, "video/AV1").is_none());
        assert!(find_by_mime(MediaKind::Audio, "video/VP8").is_none());
    }

    #[test]
    fn test_green_is_unknown() {
        let green = RtpMap::parse("116 green/90000").unwrap();
        assert!(find_for_rtpmap(MediaKind::Video, &green).is_none());

        let vp8 = RtpMap::parse("100 vp8/90000").unwrap();
        assert_eq!(find_for_rtpmap(MediaKind::Video, &vp8).unwrap().encoding, "VP8");
    }

    #[test]
    fn test_opus_capability() {
        let cap = find_by_mime(MediaKind::Audio, "audio/opus").unwrap().capability();
        assert_eq!(cap.clock_rate, 48_000);
        assert_eq!(cap.channels, 2);
        assert!(!find_by_mime(MediaKind::Audio, "audio/red").unwrap().is_media());
    }
}
