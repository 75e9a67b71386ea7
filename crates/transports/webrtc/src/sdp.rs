//! Session descriptions
//!
//! Offers and answers travel as plain SDP text. Before an endpoint applies a
//! description it is checked structurally and run through the `webrtc`
//! crate's SDP parser; [`ParsedSdp`] then gives the line-level view the
//! substrate and the tests need (media sections, rtpmaps, ICE credentials).

use crate::config::SdpRewrite;
use crate::{Error, Result};
use framerelay_core::MediaKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Session offer
    Offer,
    /// Session answer
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// Typed SDP text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an offer body
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an answer body
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Copy with every rewrite rule applied in order
    pub fn rewritten(&self, rules: &[SdpRewrite]) -> Self {
        let sdp = rules
            .iter()
            .fold(self.sdp.clone(), |sdp, rule| rule.apply(&sdp));
        Self {
            kind: self.kind,
            sdp,
        }
    }

    /// Convert to the `webrtc` crate's description, parsing the body
    ///
    /// # Errors
    ///
    /// Returns [`Error::Negotiation`] when the body is not parseable SDP.
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let result = match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        result.map_err(|e| Error::Negotiation(format!("malformed {}: {}", self.kind, e)))
    }

    /// Validate and parse the body
    ///
    /// # Errors
    ///
    /// Returns [`Error::Negotiation`] if the body is not SDP, has no media
    /// section, or carries no ICE username fragment.
    pub fn parse(&self) -> Result<ParsedSdp> {
        if !self.sdp.trim_start().starts_with("v=0") {
            return Err(Error::Negotiation(format!(
                "malformed {}: missing version line",
                self.kind
            )));
        }
        self.to_rtc()?;

        let parsed = ParsedSdp::from_text(&self.sdp);
        if parsed.media.is_empty() {
            return Err(Error::Negotiation(format!(
                "{} has no media sections",
                self.kind
            )));
        }
        if parsed.ice_ufrag().is_none() {
            return Err(Error::Negotiation(format!(
                "{} carries no ice-ufrag",
                self.kind
            )));
        }
        Ok(parsed)
    }
}

/// Media direction attribute of one m-section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    /// `a=sendrecv` (also the SDP default)
    #[default]
    SendRecv,
    /// `a=sendonly`
    SendOnly,
    /// `a=recvonly`
    RecvOnly,
    /// `a=inactive`
    Inactive,
}

impl MediaDirection {
    fn from_attribute(attr: &str) -> Option<Self> {
        match attr {
            "sendrecv" => Some(MediaDirection::SendRecv),
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }

    /// Attribute token
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        }
    }

    /// Whether the describing side sends media
    pub fn sends(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::SendOnly)
    }

    /// Whether the describing side receives media
    pub fn receives(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::RecvOnly)
    }

    /// Direction an answerer uses in reply to this offered direction
    pub fn answer(&self, answerer_sends: bool) -> Self {
        match (self.sends(), self.receives() && answerer_sends) {
            (true, true) => MediaDirection::SendRecv,
            (true, false) => MediaDirection::RecvOnly,
            (false, true) => MediaDirection::SendOnly,
            (false, false) => MediaDirection::Inactive,
        }
    }
}

/// One `a=rtpmap` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    /// Payload type number
    pub payload_type: u8,
    /// Encoding name as written (`VP8`, `opus`, `red`, ...)
    pub encoding: String,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Channel count (audio only)
    pub channels: Option<u16>,
}

impl RtpMap {
    /// Parse the value of an `a=rtpmap:` attribute (`96 VP8/90000`)
    pub fn parse(value: &str) -> Option<Self> {
        let (pt, codec) = value.split_once(' ')?;
        let mut parts = codec.trim().split('/');
        let encoding = parts.next()?.to_string();
        let clock_rate = parts.next()?.parse().ok()?;
        let channels = parts.next().and_then(|c| c.parse().ok());
        Some(Self {
            payload_type: pt.parse().ok()?,
            encoding,
            clock_rate,
            channels,
        })
    }

    /// Mime type for a section of the given kind (`video/VP8`)
    pub fn mime_type(&self, kind: &str) -> String {
        format!("{}/{}", kind, self.encoding)
    }

    /// `name/clock` form used in rewrite rules (`red/90000`)
    pub fn codec_name(&self) -> String {
        format!("{}/{}", self.encoding, self.clock_rate)
    }
}

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaSection {
    /// Media type token (`audio`, `video`, ...)
    pub kind: String,
    /// Port, `0` when the section was rejected
    pub port: u16,
    /// Payload types in preference order
    pub formats: Vec<u8>,
    /// `a=mid`
    pub mid: Option<String>,
    /// Direction attribute
    pub direction: MediaDirection,
    /// `a=rtpmap` lines in order of appearance
    pub rtpmaps: Vec<RtpMap>,
    /// `a=ice-ufrag` at media level
    pub ice_ufrag: Option<String>,
    /// `a=msid` value (`stream track`)
    pub msid: Option<String>,
}

impl MediaSection {
    /// Media kind, if audio or video
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self.kind.as_str() {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Whether the section was rejected by port zero
    pub fn is_rejected(&self) -> bool {
        self.port == 0
    }

    /// rtpmap for a payload type
    pub fn rtpmap(&self, payload_type: u8) -> Option<&RtpMap> {
        self.rtpmaps.iter().find(|m| m.payload_type == payload_type)
    }

    /// rtpmaps ordered by the m-line's format list
    pub fn codecs(&self) -> Vec<&RtpMap> {
        self.formats
            .iter()
            .filter_map(|pt| self.rtpmap(*pt))
            .collect()
    }

    /// Whether any rtpmap has this `name/clock` (case-insensitive)
    pub fn has_codec(&self, codec_name: &str) -> bool {
        self.rtpmaps
            .iter()
            .any(|m| m.codec_name().eq_ignore_ascii_case(codec_name))
    }
}

/// Line-level view of an SDP body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedSdp {
    /// Session-level `a=ice-ufrag`
    pub session_ice_ufrag: Option<String>,
    /// Media sections in order
    pub media: Vec<MediaSection>,
}

impl ParsedSdp {
    /// Scan an SDP body without validating it
    pub fn from_text(sdp: &str) -> Self {
        let mut parsed = ParsedSdp::default();

        for line in sdp.lines() {
            let line = line.trim_end_matches('\r');

            if let Some(m) = line.strip_prefix("m=") {
                let mut fields = m.split_whitespace();
                let kind = fields.next().unwrap_or_default().to_string();
                let port = fields
                    .next()
                    .and_then(|p| p.split('/').next())
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0);
                let _protocol = fields.next();
                let formats = fields.filter_map(|f| f.parse().ok()).collect();
                parsed.media.push(MediaSection {
                    kind,
                    port,
                    formats,
                    ..Default::default()
                });
                continue;
            }

            let Some(attr) = line.strip_prefix("a=") else {
                continue;
            };
            let (name, value) = match attr.split_once(':') {
                Some((n, v)) => (n, Some(v)),
                None => (attr, None),
            };

            let Some(section) = parsed.media.last_mut() else {
                if name == "ice-ufrag" {
                    parsed.session_ice_ufrag = value.map(str::to_string);
                }
                continue;
            };

            match (name, value) {
                ("mid", Some(v)) => section.mid = Some(v.to_string()),
                ("ice-ufrag", Some(v)) => section.ice_ufrag = Some(v.to_string()),
                ("msid", Some(v)) => section.msid = Some(v.to_string()),
                ("rtpmap", Some(v)) => {
                    if let Some(map) = RtpMap::parse(v) {
                        section.rtpmaps.push(map);
                    }
                }
                (other, None) => {
                    if let Some(dir) = MediaDirection::from_attribute(other) {
                        section.direction = dir;
                    }
                }
                _ => {}
            }
        }

        parsed
    }

    /// ICE username fragment, media level first then session level
    pub fn ice_ufrag(&self) -> Option<&str> {
        self.media
            .iter()
            .find_map(|m| m.ice_ufrag.as_deref())
            .or(self.session_ice_ufrag.as_deref())
    }

    /// First section of the given kind
    pub fn section(&self, kind: MediaKind) -> Option<&MediaSection> {
        self.media.iter().find(|m| m.kind == kind.as_str())
    }

    /// Section carrying the given mid
    pub fn section_by_mid(&self, mid: &str) -> Option<&MediaSection> {
        self.media.iter().find(|m| m.mid.as_deref() == Some(mid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 63\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:abcd\r\n\
a=ice-pwd:0123456789abcdef01234567\r\n\
a=mid:0\r\n\
a=sendrecv\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtpmap:63 red/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:abcd\r\n\
a=ice-pwd:0123456789abcdef01234567\r\n\
a=mid:1\r\n\
a=msid:stream track\r\n\
a=sendonly\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 red/90000\r\n";

    #[test]
    fn test_parse_sections() {
        let parsed = SessionDescription::offer(OFFER).parse().unwrap();
        assert_eq!(parsed.media.len(), 2);
        assert_eq!(parsed.ice_ufrag(), Some("abcd"));

        let audio = parsed.section(MediaKind::Audio).unwrap();
        assert_eq!(audio.formats, vec![111, 63]);
        assert_eq!(audio.rtpmap(111).unwrap().channels, Some(2));
        assert_eq!(audio.direction, MediaDirection::SendRecv);

        let video = parsed.section_by_mid("1").unwrap();
        assert_eq!(video.media_kind(), Some(MediaKind::Video));
        assert_eq!(video.direction, MediaDirection::SendOnly);
        assert_eq!(video.msid.as_deref(), Some("stream track"));
        assert_eq!(video.codecs()[0].mime_type("video"), "video/VP8");
        assert!(video.has_codec("RED/90000"));
    }

    #[test]
    fn test_rewrite_touches_video_red_only() {
        let offer = SessionDescription::offer(OFFER);
        let rewritten = offer.rewritten(&[SdpRewrite::red_to_green()]);
        let parsed = ParsedSdp::from_text(&rewritten.sdp);

        let video = parsed.section(MediaKind::Video).unwrap();
        assert!(video.has_codec("green/90000"));
        assert!(!video.has_codec("red/90000"));
        // audio red is red/48000, so it is not a match
        assert!(parsed.section(MediaKind::Audio).unwrap().has_codec("red/48000"));
        assert_eq!(rewritten.kind, SdpKind::Offer);
    }

    #[test]
    fn test_malformed_rejected() {
        let err = SessionDescription::offer("hello").parse().unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));

        let no_media = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
        let err = SessionDescription::answer(no_media).parse().unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
    }

    #[test]
    fn test_answer_direction() {
        assert_eq!(MediaDirection::SendRecv.answer(false), MediaDirection::RecvOnly);
        assert_eq!(MediaDirection::SendRecv.answer(true), MediaDirection::SendRecv);
        assert_eq!(MediaDirection::RecvOnly.answer(true), MediaDirection::SendOnly);
        assert_eq!(MediaDirection::Inactive.answer(true), MediaDirection::Inactive);
    }

    #[test]
    fn test_description_serde() {
        let desc = SessionDescription::answer("v=0\r\n");
        let json = serde_json::to_string(&desc).unwrap();
        assert!(json.contains("\"type\":\"answer\""));
        let back: SessionDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_rtpmap_parse() {
        let map = RtpMap::parse("111 opus/48000/2").unwrap();
        assert_eq!(map.codec_name(), "opus/48000");
        assert!(RtpMap::parse("garbage").is_none());
    }
}
