//! SDP text generation for loopback endpoints

use super::codecs::LocalCodec;
use crate::sdp::MediaDirection;
use framerelay_core::MediaKind;
use std::fmt::Write;

/// ICE and DTLS credentials written into every media section
pub(super) struct Credentials<'a> {
    pub ufrag: &'a str,
    pub pwd: &'a str,
    pub fingerprint: &'a str,
}

/// One m-section to write
pub(super) struct SectionSpec<'a> {
    pub kind: &'a str,
    pub mid: &'a str,
    /// `None` rejects the section (port 0)
    pub codecs: Option<Vec<(u8, &'static LocalCodec)>>,
    /// Payload type listed on a rejected m-line
    pub rejected_format: u8,
    pub direction: MediaDirection,
    pub msid: Option<(&'a str, &'a str)>,
    pub setup: &'a str,
}

impl<'a> SectionSpec<'a> {
    /// Accepted section for our own offer
    pub fn offered(
        kind: MediaKind,
        mid: &'a str,
        codecs: &[&'static LocalCodec],
        msid: (&'a str, &'a str),
    ) -> Self {
        Self {
            kind: kind.as_str(),
            mid,
            codecs: Some(codecs.iter().map(|c| (c.payload_type, *c)).collect()),
            rejected_format: 0,
            direction: MediaDirection::SendRecv,
            msid: Some(msid),
            setup: "actpass",
        }
    }
}

/// Render a full session description
pub(super) fn write_description(
    session_id: u64,
    version: u64,
    credentials: &Credentials<'_>,
    sections: &[SectionSpec<'_>],
) -> String {
    let mut sdp = String::new();

    // Writing to a String cannot fail
    let _ = write!(sdp, "v=0\r\n");
    let _ = write!(sdp, "o=- {} {} IN IP4 127.0.0.1\r\n", session_id, version);
    let _ = write!(sdp, "s=-\r\n");
    let _ = write!(sdp, "t=0 0\r\n");

    let bundled: Vec<&str> = sections
        .iter()
        .filter(|s| s.codecs.is_some())
        .map(|s| s.mid)
        .collect();
    if !bundled.is_empty() {
        let _ = write!(sdp, "a=group:BUNDLE {}\r\n", bundled.join(" "));
    }

    for section in sections {
        write_section(&mut sdp, credentials, section);
    }

    sdp
}

fn write_section(sdp: &mut String, credentials: &Credentials<'_>, section: &SectionSpec<'_>) {
    let Some(codecs) = &section.codecs else {
        let _ = write!(
            sdp,
            "m={} 0 UDP/TLS/RTP/SAVPF {}\r\n",
            section.kind, section.rejected_format
        );
        let _ = write!(sdp, "c=IN IP4 0.0.0.0\r\n");
        let _ = write!(sdp, "a=mid:{}\r\n", section.mid);
        let _ = write!(sdp, "a=inactive\r\n");
        return;
    };

    let formats: Vec<String> = codecs.iter().map(|(pt, _)| pt.to_string()).collect();
    let _ = write!(
        sdp,
        "m={} 9 UDP/TLS/RTP/SAVPF {}\r\n",
        section.kind,
        formats.join(" ")
    );
    let _ = write!(sdp, "c=IN IP4 0.0.0.0\r\n");
    let _ = write!(sdp, "a=ice-ufrag:{}\r\n", credentials.ufrag);
    let _ = write!(sdp, "a=ice-pwd:{}\r\n", credentials.pwd);
    let _ = write!(sdp, "a=fingerprint:sha-256 {}\r\n", credentials.fingerprint);
    let _ = write!(sdp, "a=setup:{}\r\n", section.setup);
    let _ = write!(sdp, "a=mid:{}\r\n", section.mid);
    if let Some((stream, track)) = section.msid {
        let _ = write!(sdp, "a=msid:{} {}\r\n", stream, track);
    }
    let _ = write!(sdp, "a={}\r\n", section.direction.as_str());
    let _ = write!(sdp, "a=rtcp-mux\r\n");

    for (pt, codec) in codecs {
        let _ = write!(sdp, "a=rtpmap:{}\r\n", codec.rtpmap(*pt));
        if let Some(fmtp) = codec.fmtp {
            let _ = write!(sdp, "a=fmtp:{} {}\r\n", pt, fmtp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::codecs::codecs_for;
    use super::*;
    use crate::sdp::{ParsedSdp, SessionDescription};

    fn credentials() -> Credentials<'static> {
        Credentials {
            ufrag: "uFrg",
            pwd: "passwordpasswordpassword",
            fingerprint: "AB:CD",
        }
    }

    #[test]
    fn test_offer_parses() {
        let video: Vec<_> = codecs_for(MediaKind::Video).collect();
        let audio: Vec<_> = codecs_for(MediaKind::Audio).collect();
        let sections = [
            SectionSpec::offered(MediaKind::Audio, "0", &audio, ("s", "a")),
            SectionSpec::offered(MediaKind::Video, "1", &video, ("s", "v")),
        ];
        let sdp = write_description(7, 1, &credentials(), &sections);
        assert!(sdp.contains("a=group:BUNDLE 0 1\r\n"));
        assert!(sdp.contains("a=rtpmap:116 red/90000\r\n"));

        let parsed = SessionDescription::offer(sdp).parse().unwrap();
        assert_eq!(parsed.ice_ufrag(), Some("uFrg"));
        let v = parsed.section(MediaKind::Video).unwrap();
        assert_eq!(v.formats, vec![96, 98, 102, 116, 117]);
        assert_eq!(v.msid.as_deref(), Some("s v"));
    }

    #[test]
    fn test_rejected_section() {
        let sections = [SectionSpec {
            kind: "video",
            mid: "0",
            codecs: None,
            rejected_format: 120,
            direction: MediaDirection::Inactive,
            msid: None,
            setup: "active",
        }];
        let sdp = write_description(7, 1, &credentials(), &sections);
        let parsed = ParsedSdp::from_text(&sdp);
        assert!(parsed.media[0].is_rejected());
        assert_eq!(parsed.media[0].formats, vec![120]);
        assert!(!sdp.contains("BUNDLE"));
    }
}
