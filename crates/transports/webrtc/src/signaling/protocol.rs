//! Signaling messages exchanged between the two sides of a link
//!
//! Description steps are request/response:
//!
//! ```text
//! initiator                      responder
//!   offer(desc)          ->
//!                        <-      answer(desc) | failed
//!   commit               ->
//!                        <-      committed | failed
//! ```
//!
//! Candidates flow in both directions as fire-and-forget `candidate`
//! messages. `bye` ends the exchange.

use crate::sdp::SessionDescription;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// One signaling message, serialized as `{"type": "...", ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Offer for the responder to apply as its remote description
    Offer {
        /// Offer as seen by the responder (after rewriting)
        description: SessionDescription,
    },

    /// Responder's answer
    Answer {
        /// Answer description
        description: SessionDescription,
    },

    /// Initiator has applied the answer; responder may apply it locally
    Commit,

    /// Responder has applied its answer locally
    Committed,

    /// Trickled ICE candidate
    Candidate {
        /// Candidate to add on the receiving side
        candidate: RTCIceCandidateInit,
    },

    /// A description step failed on the sending side
    Failed {
        /// Human-readable reason
        reason: String,
    },

    /// Link is going away
    Bye,
}

impl SignalingMessage {
    /// Message type tag, as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Commit => "commit",
            SignalingMessage::Committed => "committed",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::Failed { .. } => "failed",
            SignalingMessage::Bye => "bye",
        }
    }

    /// Encode as JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
