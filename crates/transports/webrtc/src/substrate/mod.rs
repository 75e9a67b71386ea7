//! Transport substrate
//!
//! The traits a link drives to negotiate and carry media. They mirror the
//! browser peer-connection surface a link needs and nothing more:
//! description creation and application, trickled candidates, encoded-frame
//! access on senders and receivers, remote-track events, and codec
//! capabilities.
//!
//! [`loopback`] implements them in process.

pub mod loopback;

use crate::config::EndpointConfig;
use crate::media::{MediaTrack, RemoteTrack};
use crate::sdp::SessionDescription;
use crate::Result;
use async_trait::async_trait;
use framerelay_core::{EncodedFrame, MediaKind};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Sender handle on an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SenderId(pub u32);

/// Receiver handle on an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ReceiverId(pub u32);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rx{}", self.0)
    }
}

/// The two halves of an intercepted encoded-frame stream
///
/// On a sender, `readable` yields frames straight out of the encoder and
/// whatever is written to `writable` goes on the wire. On a receiver,
/// `readable` yields frames off the wire and `writable` feeds the decoder
/// (the remote track).
#[derive(Debug)]
pub struct EncodedStreams {
    /// Frames to transform
    pub readable: mpsc::Receiver<EncodedFrame>,
    /// Destination for transformed frames
    pub writable: mpsc::Sender<EncodedFrame>,
}

/// A receiver announced after a remote description was applied
#[derive(Debug)]
pub struct TrackEvent {
    /// Receiver carrying the track
    pub receiver: ReceiverId,
    /// The received track
    pub track: RemoteTrack,
}

/// Factory for endpoints
#[async_trait]
pub trait TransportSubstrate: Send + Sync {
    /// Create an endpoint
    ///
    /// # Arguments
    ///
    /// * `label` - Name used in logs
    /// * `config` - Creation-time options (frame interception)
    /// * `ice_servers` - STUN/TURN URLs for candidate gathering
    /// * `frame_capacity` - Capacity of each encoded-frame channel
    async fn create_endpoint(
        &self,
        label: &str,
        config: EndpointConfig,
        ice_servers: &[String],
        frame_capacity: usize,
    ) -> Result<Arc<dyn TransportEndpoint>>;

    /// Codecs a sender of this kind can use
    fn sender_capabilities(&self, kind: MediaKind) -> Vec<RTCRtpCodecCapability>;
}

/// One side of a peer-to-peer media session
#[async_trait]
pub trait TransportEndpoint: Send + Sync {
    /// Endpoint label
    fn label(&self) -> &str;

    /// Creation-time options
    fn config(&self) -> EndpointConfig;

    /// Attach a local track, creating a sender for it
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<SenderId>;

    /// Senders created so far, with their media kinds
    fn senders(&self) -> Vec<(SenderId, MediaKind)>;

    /// Restrict and order the codecs offered for a kind
    ///
    /// # Errors
    ///
    /// Returns an error if none of the codecs is supported.
    fn set_codec_preferences(&self, kind: MediaKind, codecs: Vec<RTCRtpCodecCapability>)
        -> Result<()>;

    /// Create an offer covering every sender
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a description created by this endpoint
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a description created by the peer
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Currently applied local description
    fn local_description(&self) -> Option<SessionDescription>;

    /// Currently applied remote description
    fn remote_description(&self) -> Option<SessionDescription>;

    /// Add a candidate gathered by the peer
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`](crate::Error::InvalidState) when no
    /// remote description is set, and
    /// [`Error::IceCandidate`](crate::Error::IceCandidate) for candidates
    /// that do not parse or belong to another session.
    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    /// Stream of locally gathered candidates (can be taken once)
    fn take_candidate_events(&self) -> Option<mpsc::Receiver<RTCIceCandidateInit>>;

    /// Stream of remote tracks (can be taken once)
    fn take_track_events(&self) -> Option<mpsc::Receiver<TrackEvent>>;

    /// Encoded-frame streams of a sender (can be taken once)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InterceptionDisabled`](crate::Error::InterceptionDisabled)
    /// unless the endpoint was created with frame interception.
    fn sender_streams(&self, sender: SenderId) -> Result<EncodedStreams>;

    /// Encoded-frame streams of a receiver (can be taken once)
    ///
    /// # Errors
    ///
    /// Same as [`sender_streams`](Self::sender_streams).
    fn receiver_streams(&self, receiver: ReceiverId) -> Result<EncodedStreams>;

    /// Whether the media path to the peer is up
    fn is_transport_connected(&self) -> bool;

    /// Release the endpoint (idempotent)
    async fn close(&self) -> Result<()>;
}
