//! In-process substrate
//!
//! [`LoopbackSubstrate`] creates [`LoopbackEndpoint`]s attached to one shared
//! [`LoopbackNetwork`]. [`SyntheticCapture`] stands in for a camera and
//! microphone.

pub mod capture;
pub mod codecs;
pub mod endpoint;
pub mod network;
mod session;

pub use capture::SyntheticCapture;
pub use endpoint::{EndpointStats, LoopbackEndpoint};
pub use network::LoopbackNetwork;

use super::{TransportEndpoint, TransportSubstrate};
use crate::config::EndpointConfig;
use crate::Result;
use async_trait::async_trait;
use framerelay_core::MediaKind;
use std::sync::Arc;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Substrate whose endpoints talk to each other inside the process
#[derive(Debug, Clone)]
pub struct LoopbackSubstrate {
    network: Arc<LoopbackNetwork>,
}

impl LoopbackSubstrate {
    /// Create a substrate with its own network
    pub fn new() -> Self {
        Self {
            network: LoopbackNetwork::new(),
        }
    }

    /// Network shared by this substrate's endpoints
    pub fn network(&self) -> &Arc<LoopbackNetwork> {
        &self.network
    }

    /// Create a concrete loopback endpoint
    pub fn loopback_endpoint(
        &self,
        label: &str,
        config: EndpointConfig,
        ice_servers: &[String],
        frame_capacity: usize,
    ) -> LoopbackEndpoint {
        LoopbackEndpoint::new(
            Arc::clone(&self.network),
            label,
            config,
            ice_servers,
            frame_capacity,
        )
    }
}

impl Default for LoopbackSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportSubstrate for LoopbackSubstrate {
    async fn create_endpoint(
        &self,
        label: &str,
        config: EndpointConfig,
        ice_servers: &[String],
        frame_capacity: usize,
    ) -> Result<Arc<dyn TransportEndpoint>> {
        Ok(Arc::new(self.loopback_endpoint(
            label,
            config,
            ice_servers,
            frame_capacity,
        )))
    }

    fn sender_capabilities(&self, kind: MediaKind) -> Vec<RTCRtpCodecCapability> {
        codecs::codecs_for(kind).map(|c| c.capability()).collect()
    }
}
