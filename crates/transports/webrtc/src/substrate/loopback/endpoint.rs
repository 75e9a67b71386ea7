//! Loopback endpoint
//!
//! Behaves like a browser peer connection restricted to what a relay link
//! uses. Offers and answers are real SDP. Candidates are gathered once a local
//! description is applied. Media flows from a sender to the peer's matching
//! receiver (by mid) once both sides hold each other's description and at
//! least one remote candidate.
//!
//! Per sender the frame path is
//! `track -> encoder -> [interception] -> egress -> peer ingress -> [interception] -> remote track`.

use super::codecs::{self, LocalCodec};
use super::network::LoopbackNetwork;
use super::session::{self, Credentials, SectionSpec};
use crate::config::EndpointConfig;
use crate::media::{MediaSample, MediaTrack, RemoteTrack};
use crate::sdp::{ParsedSdp, SdpKind, SessionDescription};
use crate::substrate::{EncodedStreams, ReceiverId, SenderId, TrackEvent, TransportEndpoint};
use crate::{Error, Result};
use async_trait::async_trait;
use framerelay_core::{EncodedFrame, FrameMetadata, MediaKind};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

const EVENT_CHANNEL_CAPACITY: usize = 32;
const GATHER_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

struct SenderSlot {
    id: SenderId,
    kind: MediaKind,
    mid: String,
    track_id: String,
    stream_id: String,
    payload_type: Arc<AtomicU8>,
    active: Arc<AtomicBool>,
    intercept: Option<EncodedStreams>,
}

struct ReceiverSlot {
    id: ReceiverId,
    mid: String,
    ingress: mpsc::Sender<EncodedFrame>,
    intercept: Option<EncodedStreams>,
}

struct EndpointState {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_ufrag: Option<String>,
    remote_candidates: usize,
    gathering_started: bool,
    version: u64,
    senders: Vec<SenderSlot>,
    receivers: Vec<ReceiverSlot>,
    preferences: HashMap<MediaKind, Vec<&'static LocalCodec>>,
}

/// Frame counters of a loopback endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    /// Frames handed to the peer
    pub frames_sent: u64,
    /// Frames accepted from the peer
    pub frames_received: u64,
    /// Frames lost to a full queue, a missing receiver or a path that is not up
    pub frames_dropped: u64,
}

pub(super) struct EndpointShared {
    label: String,
    config: EndpointConfig,
    ufrag: String,
    pwd: String,
    fingerprint: String,
    session_id: u64,
    ice_servers: Vec<String>,
    frame_capacity: usize,
    network: Arc<LoopbackNetwork>,
    state: Mutex<EndpointState>,
    closed: AtomicBool,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    candidate_tx: mpsc::Sender<RTCIceCandidateInit>,
    track_tx: mpsc::Sender<TrackEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for EndpointShared {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl EndpointShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidState(format!("{} is closed", self.label)));
        }
        Ok(())
    }

    fn credentials(&self) -> Credentials<'_> {
        Credentials {
            ufrag: &self.ufrag,
            pwd: &self.pwd,
            fingerprint: &self.fingerprint,
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.lock().push(handle);
    }

    /// The connected peer, if the media path is up in both directions
    fn peer(&self) -> Option<Arc<EndpointShared>> {
        if self.is_closed() {
            return None;
        }

        let remote_ufrag = {
            let state = self.state.lock();
            if state.remote.is_none() || state.remote_candidates == 0 {
                return None;
            }
            state.remote_ufrag.clone()?
        };

        let peer = self.network.lookup(&remote_ufrag)?;
        if peer.is_closed() {
            return None;
        }

        let peer_ready = {
            let state = peer.state.lock();
            state.remote_ufrag.as_deref() == Some(self.ufrag.as_str()) && state.remote_candidates > 0
        };
        peer_ready.then_some(peer)
    }

    /// Accept a frame from the peer for the receiver negotiated on `mid`
    fn deliver(&self, mid: &str, frame: EncodedFrame) -> bool {
        if self.is_closed() {
            return false;
        }

        let ingress = self
            .state
            .lock()
            .receivers
            .iter()
            .find(|r| r.mid == mid)
            .map(|r| r.ingress.clone());

        let Some(ingress) = ingress else {
            trace!(endpoint = %self.label, mid = mid, "No receiver for mid, dropping frame");
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match ingress.try_send(frame) {
            Ok(()) => {
                self.frames_received.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn open_receiver(
        &self,
        state: &mut EndpointState,
        kind: MediaKind,
        mid: &str,
        msid: Option<&str>,
    ) -> TrackEvent {
        let id = ReceiverId(state.receivers.len() as u32);
        let (decoder_tx, decoder_rx) = mpsc::channel(self.frame_capacity);

        let (ingress, intercept) = if self.config.enable_frame_interception {
            let (wire_tx, wire_rx) = mpsc::channel(self.frame_capacity);
            (
                wire_tx,
                Some(EncodedStreams {
                    readable: wire_rx,
                    writable: decoder_tx,
                }),
            )
        } else {
            (decoder_tx, None)
        };

        let (stream_id, track_id) = msid
            .and_then(|m| m.split_once(' '))
            .map(|(s, t)| (s.to_string(), t.to_string()))
            .unwrap_or_else(|| ("-".to_string(), uuid::Uuid::new_v4().to_string()));

        state.receivers.push(ReceiverSlot {
            id,
            mid: mid.to_string(),
            ingress,
            intercept,
        });

        debug!(
            endpoint = %self.label,
            receiver = %id,
            kind = %kind,
            mid = mid,
            "Opened receiver"
        );

        TrackEvent {
            receiver: id,
            track: RemoteTrack::new(track_id, kind, stream_id, mid, decoder_rx),
        }
    }

    fn stats(&self) -> EndpointStats {
        EndpointStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Turns source samples into encoded frames with transport metadata
async fn run_encoder(
    mut samples: broadcast::Receiver<MediaSample>,
    encoded: mpsc::Sender<EncodedFrame>,
    ssrc: u32,
    payload_type: Arc<AtomicU8>,
    label: String,
) {
    let mut sequence = 0u64;

    loop {
        let sample = match samples.recv().await {
            Ok(sample) => sample,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(sender = %label, "Encoder lagged behind source, skipped {} samples", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let clock_rate: u128 = match sample.kind {
            MediaKind::Video => 90_000,
            MediaKind::Audio => 48_000,
        };
        let metadata = FrameMetadata {
            // RTP timestamps wrap
            timestamp: (sample.timestamp.as_micros() * clock_rate / 1_000_000) as u32,
            sequence,
            ssrc,
            payload_type: payload_type.load(Ordering::Relaxed),
        };
        sequence += 1;

        let frame = EncodedFrame {
            kind: sample.kind,
            frame_type: sample.frame_type,
            data: sample.payload,
            metadata,
        };

        match encoded.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!(sender = %label, "Encoded frame queue full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    trace!(sender = %label, "Encoder stopped");
}

/// Puts frames on the wire to the peer
async fn run_egress(
    shared: Weak<EndpointShared>,
    mid: String,
    active: Arc<AtomicBool>,
    mut wire: mpsc::Receiver<EncodedFrame>,
) {
    while let Some(frame) = wire.recv().await {
        let Some(endpoint) = shared.upgrade() else {
            break;
        };
        if endpoint.is_closed() {
            break;
        }
        if !active.load(Ordering::Relaxed) {
            endpoint.frames_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match endpoint.peer() {
            Some(peer) => {
                if peer.deliver(&mid, frame) {
                    endpoint.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                endpoint.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(endpoint = %endpoint.label, mid = %mid, "Transport not connected, dropping frame");
            }
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// In-process [`TransportEndpoint`]
pub struct LoopbackEndpoint {
    shared: Arc<EndpointShared>,
    candidate_rx: Mutex<Option<mpsc::Receiver<RTCIceCandidateInit>>>,
    track_rx: Mutex<Option<mpsc::Receiver<TrackEvent>>>,
}

impl LoopbackEndpoint {
    pub(super) fn new(
        network: Arc<LoopbackNetwork>,
        label: &str,
        config: EndpointConfig,
        ice_servers: &[String],
        frame_capacity: usize,
    ) -> Self {
        let (fingerprint, session_id) = {
            let mut rng = rand::thread_rng();
            let fingerprint = (0..32)
                .map(|_| format!("{:02X}", rng.gen::<u8>()))
                .collect::<Vec<_>>()
                .join(":");
            (fingerprint, rng.gen::<u64>() >> 1)
        };

        let (candidate_tx, candidate_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (track_tx, track_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(EndpointShared {
            label: label.to_string(),
            config,
            ufrag: random_token(8),
            pwd: random_token(24),
            fingerprint,
            session_id,
            ice_servers: ice_servers.to_vec(),
            frame_capacity: frame_capacity.max(1),
            network: Arc::clone(&network),
            state: Mutex::new(EndpointState {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                remote_ufrag: None,
                remote_candidates: 0,
                gathering_started: false,
                version: 1,
                senders: Vec::new(),
                receivers: Vec::new(),
                preferences: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            candidate_tx,
            track_tx,
            tasks: Mutex::new(Vec::new()),
        });

        network.register(&shared.ufrag, &shared);

        debug!(
            endpoint = label,
            ufrag = %shared.ufrag,
            intercept = config.enable_frame_interception,
            "Created loopback endpoint"
        );

        Self {
            shared,
            candidate_rx: Mutex::new(Some(candidate_rx)),
            track_rx: Mutex::new(Some(track_rx)),
        }
    }

    /// ICE username fragment written into this endpoint's descriptions
    pub fn ice_ufrag(&self) -> &str {
        &self.shared.ufrag
    }

    /// Frame counters
    pub fn stats(&self) -> EndpointStats {
        self.shared.stats()
    }

    fn require_interception(&self) -> Result<()> {
        if !self.shared.config.enable_frame_interception {
            return Err(Error::InterceptionDisabled(format!(
                "{} was created without frame interception",
                self.shared.label
            )));
        }
        Ok(())
    }

    fn start_gathering(&self) {
        let shared = &self.shared;
        let port = shared.network.allocate_port();

        let make = |candidate: String| RTCIceCandidateInit {
            candidate,
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: Some(shared.ufrag.clone()),
        };

        let mut candidates = vec![make(format!(
            "candidate:1 1 udp 2130706431 127.0.0.1 {} typ host generation 0 ufrag {}",
            port, shared.ufrag
        ))];
        if shared.ice_servers.iter().any(|s| s.starts_with("stun:")) {
            candidates.push(make(format!(
                "candidate:2 1 udp 1694498815 192.0.2.1 {} typ srflx raddr 127.0.0.1 rport {} generation 0 ufrag {}",
                port, port, shared.ufrag
            )));
        }

        let tx = shared.candidate_tx.clone();
        let label = shared.label.clone();
        shared.spawn(async move {
            let count = candidates.len();
            for candidate in candidates {
                tokio::time::sleep(GATHER_INTERVAL).await;
                trace!(endpoint = %label, "Gathered {}", candidate.candidate);
                if tx.send(candidate).await.is_err() {
                    return;
                }
            }
            debug!(endpoint = %label, count = count, "Candidate gathering complete");
        });
    }

    fn answer_sections<'a>(
        state: &EndpointState,
        parsed: &'a ParsedSdp,
        mids: &'a [String],
    ) -> Vec<SectionSpec<'a>> {
        parsed
            .media
            .iter()
            .zip(mids)
            .map(|(section, mid)| {
                let accepted: Vec<(u8, &'static LocalCodec)> = match section.media_kind() {
                    Some(kind) if !section.is_rejected() => section
                        .codecs()
                        .into_iter()
                        .filter_map(|map| {
                            let found = codecs::find_for_rtpmap(kind, map);
                            if found.is_none() {
                                debug!(mid = %mid, "Dropping unsupported codec {}", map.codec_name());
                            }
                            found.map(|codec| (map.payload_type, codec))
                        })
                        .collect(),
                    _ => Vec::new(),
                };

                let usable = accepted.iter().any(|(_, codec)| codec.is_media());
                let answerer_sends = section
                    .media_kind()
                    .map(|kind| state.senders.iter().any(|s| s.kind == kind))
                    .unwrap_or(false);

                SectionSpec {
                    kind: &section.kind,
                    mid,
                    codecs: usable.then_some(accepted),
                    rejected_format: section.formats.first().copied().unwrap_or(0),
                    direction: section.direction.answer(answerer_sends),
                    msid: None,
                    setup: "active",
                }
            })
            .collect()
    }
}

#[async_trait]
impl TransportEndpoint for LoopbackEndpoint {
    fn label(&self) -> &str {
        &self.shared.label
    }

    fn config(&self) -> EndpointConfig {
        self.shared.config
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<SenderId> {
        let shared = &self.shared;
        shared.ensure_open()?;

        let kind = track.kind();
        let default_pt = codecs::codecs_for(kind)
            .next()
            .map(|c| c.payload_type)
            .unwrap_or_default();
        let payload_type = Arc::new(AtomicU8::new(default_pt));
        let active = Arc::new(AtomicBool::new(true));

        let (encoded_tx, encoded_rx) = mpsc::channel(shared.frame_capacity);
        let (wire_rx, intercept) = if shared.config.enable_frame_interception {
            let (wire_tx, wire_rx) = mpsc::channel(shared.frame_capacity);
            (
                wire_rx,
                Some(EncodedStreams {
                    readable: encoded_rx,
                    writable: wire_tx,
                }),
            )
        } else {
            (encoded_rx, None)
        };

        let (id, mid) = {
            let mut state = shared.state.lock();
            if state.signaling != SignalingState::Stable {
                return Err(Error::InvalidState(format!(
                    "{}: tracks can only be added in stable state",
                    shared.label
                )));
            }
            let id = SenderId(state.senders.len() as u32);
            let mid = state.senders.len().to_string();
            state.senders.push(SenderSlot {
                id,
                kind,
                mid: mid.clone(),
                track_id: track.id().to_string(),
                stream_id: stream_id.to_string(),
                payload_type: Arc::clone(&payload_type),
                active: Arc::clone(&active),
                intercept,
            });
            (id, mid)
        };

        shared.spawn(run_encoder(
            track.subscribe(),
            encoded_tx,
            rand::random(),
            payload_type,
            format!("{}/{}", shared.label, id),
        ));
        shared.spawn(run_egress(Arc::downgrade(shared), mid.clone(), active, wire_rx));

        debug!(
            endpoint = %shared.label,
            sender = %id,
            kind = %kind,
            mid = %mid,
            "Added local track {}",
            track.id()
        );
        Ok(id)
    }

    fn senders(&self) -> Vec<(SenderId, MediaKind)> {
        self.shared
            .state
            .lock()
            .senders
            .iter()
            .map(|s| (s.id, s.kind))
            .collect()
    }

    fn set_codec_preferences(
        &self,
        kind: MediaKind,
        codecs: Vec<RTCRtpCodecCapability>,
    ) -> Result<()> {
        let mut resolved: Vec<&'static LocalCodec> = Vec::new();
        for capability in &codecs {
            match codecs::find_by_mime(kind, &capability.mime_type) {
                Some(codec) if !resolved.iter().any(|c| c.payload_type == codec.payload_type) => {
                    resolved.push(codec)
                }
                Some(_) => {}
                None => debug!(
                    endpoint = %self.shared.label,
                    "Ignoring unknown codec preference {}",
                    capability.mime_type
                ),
            }
        }

        if resolved.is_empty() {
            return Err(Error::UnsupportedCodecPreference(format!(
                "none of {} {} codecs is supported",
                codecs.len(),
                kind
            )));
        }

        debug!(
            endpoint = %self.shared.label,
            kind = %kind,
            first = %resolved[0].mime_type(),
            "Codec preferences set"
        );
        self.shared.state.lock().preferences.insert(kind, resolved);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let shared = &self.shared;
        shared.ensure_open()?;

        let mut state = shared.state.lock();
        if state.signaling != SignalingState::Stable {
            return Err(Error::Negotiation(format!(
                "{}: cannot create offer in state {:?}",
                shared.label, state.signaling
            )));
        }
        if state.senders.is_empty() {
            return Err(Error::Negotiation(format!(
                "{}: no tracks to offer",
                shared.label
            )));
        }
        state.version += 1;

        let lists: Vec<Vec<&'static LocalCodec>> = state
            .senders
            .iter()
            .map(|s| {
                state
                    .preferences
                    .get(&s.kind)
                    .cloned()
                    .unwrap_or_else(|| codecs::codecs_for(s.kind).collect())
            })
            .collect();

        let sections: Vec<SectionSpec<'_>> = state
            .senders
            .iter()
            .zip(&lists)
            .map(|(s, codecs)| {
                SectionSpec::offered(s.kind, &s.mid, codecs, (&s.stream_id, &s.track_id))
            })
            .collect();

        let sdp = session::write_description(
            shared.session_id,
            state.version,
            &shared.credentials(),
            &sections,
        );
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let shared = &self.shared;
        shared.ensure_open()?;

        let mut state = shared.state.lock();
        let remote = match (&state.remote, state.signaling) {
            (Some(remote), SignalingState::HaveRemoteOffer) => remote.clone(),
            (_, current) => {
                return Err(Error::Negotiation(format!(
                    "{}: no remote offer to answer (state {:?})",
                    shared.label, current
                )))
            }
        };
        state.version += 1;

        let parsed = ParsedSdp::from_text(&remote.sdp);
        let mids: Vec<String> = parsed
            .media
            .iter()
            .enumerate()
            .map(|(i, m)| m.mid.clone().unwrap_or_else(|| i.to_string()))
            .collect();
        let sections = Self::answer_sections(&state, &parsed, &mids);

        if sections.iter().all(|s| s.codecs.is_none()) {
            return Err(Error::Negotiation(format!(
                "{}: offer has no media section with a common codec",
                shared.label
            )));
        }

        let sdp = session::write_description(
            shared.session_id,
            state.version,
            &shared.credentials(),
            &sections,
        );
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_open()?;

        let kind = description.kind;
        let parsed = description.parse()?;
        if parsed.ice_ufrag() != Some(shared.ufrag.as_str()) {
            return Err(Error::Negotiation(format!(
                "local {} was not created by {}",
                kind, shared.label
            )));
        }

        let start_gathering = {
            let mut state = shared.state.lock();
            state.signaling = match (kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
                (SdpKind::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (kind, current) => {
                    return Err(Error::Negotiation(format!(
                        "{}: cannot apply local {} in state {:?}",
                        shared.label, kind, current
                    )))
                }
            };
            state.local = Some(description);
            !std::mem::replace(&mut state.gathering_started, true)
        };

        debug!(endpoint = %shared.label, "Applied local {}", kind);
        if start_gathering {
            self.start_gathering();
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_open()?;

        let kind = description.kind;
        let parsed = description.parse()?;
        let ufrag = parsed.ice_ufrag().unwrap_or_default().to_string();
        if ufrag == shared.ufrag {
            return Err(Error::Negotiation(format!(
                "{}: remote {} carries our own credentials",
                shared.label, kind
            )));
        }

        let events = {
            let mut state = shared.state.lock();
            let next = match (kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (SdpKind::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (kind, current) => {
                    return Err(Error::Negotiation(format!(
                        "{}: cannot apply remote {} in state {:?}",
                        shared.label, kind, current
                    )))
                }
            };

            if kind == SdpKind::Answer {
                let negotiated: Vec<Option<u8>> = state
                    .senders
                    .iter()
                    .map(|s| {
                        parsed
                            .section_by_mid(&s.mid)
                            .filter(|section| !section.is_rejected())
                            .and_then(|section| section.formats.first().copied())
                    })
                    .collect();

                if !negotiated.is_empty() && negotiated.iter().all(Option::is_none) {
                    return Err(Error::Negotiation(format!(
                        "{}: answer rejected every media section",
                        shared.label
                    )));
                }

                for (sender, pt) in state.senders.iter().zip(negotiated) {
                    match pt {
                        Some(pt) => {
                            sender.payload_type.store(pt, Ordering::Relaxed);
                            sender.active.store(true, Ordering::Relaxed);
                        }
                        None => {
                            sender.active.store(false, Ordering::Relaxed);
                            warn!(
                                endpoint = %shared.label,
                                mid = %sender.mid,
                                "Peer rejected media section, sender disabled"
                            );
                        }
                    }
                }
            }

            let mut events = Vec::new();
            for (index, section) in parsed.media.iter().enumerate() {
                let Some(media_kind) = section.media_kind() else {
                    continue;
                };
                if section.is_rejected() || !section.direction.sends() {
                    continue;
                }
                let mid = section.mid.clone().unwrap_or_else(|| index.to_string());
                if state.receivers.iter().any(|r| r.mid == mid) {
                    continue;
                }
                events.push(shared.open_receiver(
                    &mut state,
                    media_kind,
                    &mid,
                    section.msid.as_deref(),
                ));
            }

            if state.remote_ufrag.as_deref() != Some(ufrag.as_str()) {
                state.remote_candidates = 0;
            }
            state.signaling = next;
            state.remote = Some(description);
            state.remote_ufrag = Some(ufrag);
            events
        };

        debug!(
            endpoint = %shared.label,
            tracks = events.len(),
            "Applied remote {}",
            kind
        );

        for event in events {
            if let Err(e) = shared.track_tx.try_send(event) {
                warn!(endpoint = %shared.label, "Track event not delivered: {}", e);
            }
        }
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.shared.state.lock().local.clone()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.shared.state.lock().remote.clone()
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        let shared = &self.shared;
        if shared.is_closed() {
            debug!(endpoint = %shared.label, "Discarding candidate for closed endpoint");
            return Ok(());
        }

        // end-of-candidates
        if candidate.candidate.is_empty() {
            return Ok(());
        }

        let line = candidate
            .candidate
            .strip_prefix("a=")
            .unwrap_or(&candidate.candidate);
        let fields: Vec<&str> = line.split_whitespace().collect();
        let well_formed = line.starts_with("candidate:")
            && fields.len() >= 8
            && fields[5].parse::<u16>().is_ok()
            && fields[6] == "typ";
        if !well_formed {
            return Err(Error::IceCandidate(format!(
                "unparseable candidate: {}",
                candidate.candidate
            )));
        }

        let mut state = shared.state.lock();
        let remote_ufrag = match (&state.remote, &state.remote_ufrag) {
            (Some(_), Some(ufrag)) => ufrag.clone(),
            _ => {
                return Err(Error::InvalidState(format!(
                    "{}: remote description not set",
                    shared.label
                )))
            }
        };

        if let Some(ufrag) = candidate.username_fragment.as_deref() {
            if !ufrag.is_empty() && ufrag != remote_ufrag {
                return Err(Error::IceCandidate(format!(
                    "candidate for ufrag {} does not match remote ufrag {}",
                    ufrag, remote_ufrag
                )));
            }
        }

        state.remote_candidates += 1;
        trace!(endpoint = %shared.label, "Added remote candidate {}", line);
        Ok(())
    }

    fn take_candidate_events(&self) -> Option<mpsc::Receiver<RTCIceCandidateInit>> {
        self.candidate_rx.lock().take()
    }

    fn take_track_events(&self) -> Option<mpsc::Receiver<TrackEvent>> {
        self.track_rx.lock().take()
    }

    fn sender_streams(&self, sender: SenderId) -> Result<EncodedStreams> {
        self.require_interception()?;
        let mut state = self.shared.state.lock();
        let slot = state
            .senders
            .iter_mut()
            .find(|s| s.id == sender)
            .ok_or_else(|| {
                Error::InvalidState(format!("{}: unknown sender {}", self.shared.label, sender))
            })?;
        slot.intercept.take().ok_or_else(|| {
            Error::InvalidState(format!(
                "{}: streams of {} already taken",
                self.shared.label, sender
            ))
        })
    }

    fn receiver_streams(&self, receiver: ReceiverId) -> Result<EncodedStreams> {
        self.require_interception()?;
        let mut state = self.shared.state.lock();
        let slot = state
            .receivers
            .iter_mut()
            .find(|r| r.id == receiver)
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "{}: unknown receiver {}",
                    self.shared.label, receiver
                ))
            })?;
        slot.intercept.take().ok_or_else(|| {
            Error::InvalidState(format!(
                "{}: streams of {} already taken",
                self.shared.label, receiver
            ))
        })
    }

    fn is_transport_connected(&self) -> bool {
        self.shared.peer().is_some()
    }

    async fn close(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        shared.network.unregister(&shared.ufrag);
        {
            let mut state = shared.state.lock();
            state.signaling = SignalingState::Closed;
            state.senders.clear();
            state.receivers.clear();
        }
        for task in shared.tasks.lock().drain(..) {
            task.abort();
        }

        let stats = shared.stats();
        info!(
            endpoint = %shared.label,
            sent = stats.frames_sent,
            received = stats.frames_received,
            dropped = stats.frames_dropped,
            "Loopback endpoint closed"
        );
        Ok(())
    }
}
