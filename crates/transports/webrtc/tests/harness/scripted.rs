//! Loopback substrate with scripted timing
//!
//! Answers can be delayed, and responder endpoints can announce candidates
//! before any description exists, as a remote peer that trickles early would.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use framerelay_core::MediaKind;
use framerelay_webrtc::config::EndpointConfig;
use framerelay_webrtc::substrate::{
    EncodedStreams, ReceiverId, SenderId, TrackEvent, TransportEndpoint, TransportSubstrate,
};
use framerelay_webrtc::{LoopbackSubstrate, MediaTrack, Result, SessionDescription};
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Loopback substrate with configurable answer delay and early candidates
#[derive(Default)]
pub struct ScriptedSubstrate {
    inner: LoopbackSubstrate,
    answer_delay: Duration,
    early_candidates: usize,
}

impl ScriptedSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoints take `delay` to create an answer
    pub fn answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    /// Responder endpoints emit `count` host candidates as soon as their
    /// candidate events are taken
    pub fn early_candidates(mut self, count: usize) -> Self {
        self.early_candidates = count;
        self
    }
}

/// A well-formed host candidate without a ufrag
pub fn early_candidate(index: usize) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: format!(
            "candidate:{} 1 udp 2130706431 192.0.2.1 {} typ host",
            90 + index,
            40000 + index
        ),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        ..Default::default()
    }
}

#[async_trait]
impl TransportSubstrate for ScriptedSubstrate {
    async fn create_endpoint(
        &self,
        label: &str,
        config: EndpointConfig,
        ice_servers: &[String],
        frame_capacity: usize,
    ) -> Result<Arc<dyn TransportEndpoint>> {
        let inner = self
            .inner
            .create_endpoint(label, config, ice_servers, frame_capacity)
            .await?;
        let early_candidates = if label.ends_with("/B") {
            self.early_candidates
        } else {
            0
        };
        Ok(Arc::new(ScriptedEndpoint {
            inner,
            answer_delay: self.answer_delay,
            early_candidates,
        }))
    }

    fn sender_capabilities(&self, kind: MediaKind) -> Vec<RTCRtpCodecCapability> {
        self.inner.sender_capabilities(kind)
    }
}

struct ScriptedEndpoint {
    inner: Arc<dyn TransportEndpoint>,
    answer_delay: Duration,
    early_candidates: usize,
}

#[async_trait]
impl TransportEndpoint for ScriptedEndpoint {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn config(&self) -> EndpointConfig {
        self.inner.config()
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<SenderId> {
        self.inner.add_track(track, stream_id).await
    }

    fn senders(&self) -> Vec<(SenderId, MediaKind)> {
        self.inner.senders()
    }

    fn set_codec_preferences(
        &self,
        kind: MediaKind,
        codecs: Vec<RTCRtpCodecCapability>,
    ) -> Result<()> {
        self.inner.set_codec_preferences(kind, codecs)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.inner.create_offer().await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }
        self.inner.create_answer().await
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.inner.set_local_description(description).await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.inner.set_remote_description(description).await
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.inner.local_description()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.remote_description()
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.inner.add_ice_candidate(candidate).await
    }

    fn take_candidate_events(&self) -> Option<mpsc::Receiver<RTCIceCandidateInit>> {
        let mut gathered = self.inner.take_candidate_events()?;
        if self.early_candidates == 0 {
            return Some(gathered);
        }

        let (tx, rx) = mpsc::channel(self.early_candidates + 16);
        for index in 0..self.early_candidates {
            tx.try_send(early_candidate(index))
                .expect("room for early candidates");
        }
        tokio::spawn(async move {
            while let Some(candidate) = gathered.recv().await {
                if tx.send(candidate).await.is_err() {
                    break;
                }
            }
        });
        Some(rx)
    }

    fn take_track_events(&self) -> Option<mpsc::Receiver<TrackEvent>> {
        self.inner.take_track_events()
    }

    fn sender_streams(&self, sender: SenderId) -> Result<EncodedStreams> {
        self.inner.sender_streams(sender)
    }

    fn receiver_streams(&self, receiver: ReceiverId) -> Result<EncodedStreams> {
        self.inner.receiver_streams(receiver)
    }

    fn is_transport_connected(&self) -> bool {
        self.inner.is_transport_connected()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
