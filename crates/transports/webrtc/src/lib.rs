//! Relay links for FrameRelay
//!
//! Pairs of endpoints negotiated over their own signaling channel, carrying
//! one capture source's tracks with an optional frame transform on each side.
//!
//! # Features
//!
//! - **Relay links**: offer/answer negotiation with in-transit offer rewrites
//! - **Trickled candidates**: buffered until the target has a remote description
//! - **Frame interception**: forward transform on senders, inverse on receivers
//! - **Topologies**: several links fanned out from one source, or chained
//! - **Loopback substrate**: in-process endpoints and a synthetic capture device
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Topology                                            │
//! │  ├─ MediaSource (shared capture)                     │
//! │  └─ RelayLink × N                                    │
//! │     ├─ endpoint A ── forward transform pumps         │
//! │     ├─ InProcessSignaling (offer/answer, candidates) │
//! │     └─ endpoint B ── inverse transform pumps         │
//! │        ↓                                             │
//! │     RenderSink (observer, relay, discard)            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use framerelay_webrtc::{LinkConfig, LinkRole};
//!
//! let config = LinkConfig::middlebox("start-to-middle");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.role, LinkRole::Relay);
//! assert!(!config.responder.enable_frame_interception);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use framerelay_core::ShiftTransform;
//! use framerelay_webrtc::{
//!     CaptureConstraints, CaptureDevice, DiscardSink, LoopbackSubstrate, MiddleboxObserver,
//!     SyntheticCapture, Topology,
//! };
//!
//! # async fn example() -> framerelay_webrtc::Result<()> {
//! let source = SyntheticCapture::new()
//!     .acquire(&CaptureConstraints::default())
//!     .await?;
//! let observer = MiddleboxObserver::new("middlebox");
//!
//! let topology = Topology::middlebox_and_end_to_end(
//!     Arc::new(LoopbackSubstrate::new()),
//!     source,
//!     Arc::new(ShiftTransform::default()),
//!     Arc::new(observer.clone()),
//!     Arc::new(DiscardSink),
//! )
//! .await?;
//!
//! topology.start_all().await?;
//! // ...
//! topology.close_all().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod link;
pub mod media;
pub mod observer;
pub mod sdp;
pub mod signaling;
pub mod substrate;
pub mod topology;

pub use config::{
    EndpointConfig, LinkConfig, LinkRole, RelayConfig, SdpRewrite, TransformPlacement,
    DEFAULT_ICE_SERVERS,
};
pub use error::{Error, Result};
pub use link::{LinkState, LinkStats, RelayLink};
pub use media::{
    CaptureConstraints, CaptureDevice, DiscardSink, MediaSample, MediaSource, MediaTrack,
    RemoteTrack, RenderSink,
};
pub use observer::{MiddleboxObserver, ObserverStats};
pub use sdp::{SdpKind, SessionDescription};
pub use substrate::loopback::{LoopbackSubstrate, SyntheticCapture};
pub use substrate::{TransportEndpoint, TransportSubstrate};
pub use topology::{RelaySink, Topology, END_TO_END_LINK, MIDDLEBOX_LINK};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
