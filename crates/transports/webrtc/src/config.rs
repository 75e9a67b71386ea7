//! Configuration types for relay links

use crate::media::CaptureConstraints;
use crate::{Error, Result};
use framerelay_core::TransformConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default STUN servers handed to every endpoint
pub const DEFAULT_ICE_SERVERS: [&str; 3] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Per-endpoint options fixed at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Expose encoded-frame streams on this endpoint's senders and receivers
    ///
    /// Without it no transform can ever be attached to the endpoint.
    pub enable_frame_interception: bool,
}

impl EndpointConfig {
    /// Endpoint with frame interception enabled
    pub fn intercepting() -> Self {
        Self {
            enable_frame_interception: true,
        }
    }
}

/// What a link is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkRole {
    /// Receiver renders original media (transform at A, inverse at B)
    #[default]
    Terminal,
    /// Receiver is a middlebox that sees transformed frames and cannot invert them
    Relay,
}

/// Where transforms get attached when a link is built from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformPlacement {
    /// No transforms
    None,
    /// Forward transform on the initiator's senders only
    SenderOnly,
    /// Inverse transform on the responder's receivers only, for the last hop of a chain
    ReceiverOnly,
    /// Forward on the initiator and inverse on the responder
    #[default]
    Both,
}

impl TransformPlacement {
    /// Whether the initiator gets a forward transform
    pub fn sender(&self) -> bool {
        matches!(self, TransformPlacement::SenderOnly | TransformPlacement::Both)
    }

    /// Whether the responder gets an inverse transform
    pub fn receiver(&self) -> bool {
        matches!(self, TransformPlacement::ReceiverOnly | TransformPlacement::Both)
    }
}

/// Textual substitution applied to an offer while it is in transit
///
/// Only the first occurrence of `find` is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpRewrite {
    /// Text to look for
    pub find: String,
    /// Replacement text
    pub replace: String,
}

impl SdpRewrite {
    /// Create a rewrite rule
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }

    /// The red/90000 -> green/90000 rename every link applies by default
    pub fn red_to_green() -> Self {
        Self::new("red/90000", "green/90000")
    }

    /// Apply to a description body
    pub fn apply(&self, sdp: &str) -> String {
        sdp.replacen(&self.find, &self.replace, 1)
    }
}

/// Configuration of a single relay link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Link name used in logs and statistics
    pub name: String,

    /// Terminal or relay
    pub role: LinkRole,

    /// Options for endpoint A (the offerer, holding the source tracks)
    pub initiator: EndpointConfig,

    /// Options for endpoint B (the answerer, rendering remote tracks)
    pub responder: EndpointConfig,

    /// Transforms attached by the topology builder
    pub transforms: TransformPlacement,

    /// Rewrites applied to the offer between A and B
    pub offer_rewrites: Vec<SdpRewrite>,

    /// Video codec mime type moved to the front of A's preferences, e.g. `video/VP8`
    pub preferred_video_codec: Option<String>,

    /// STUN/TURN server URLs handed to both endpoints
    pub ice_servers: Vec<String>,

    /// Upper bound for each negotiation step in milliseconds (default: 10000)
    pub negotiation_timeout_ms: u64,

    /// Capacity of each encoded-frame channel (default: 64)
    pub frame_channel_capacity: usize,

    /// Candidates held for an endpoint without a remote description (default: 64)
    pub max_pending_candidates: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            name: "link".to_string(),
            role: LinkRole::Terminal,
            initiator: EndpointConfig::intercepting(),
            responder: EndpointConfig::intercepting(),
            transforms: TransformPlacement::Both,
            offer_rewrites: vec![SdpRewrite::red_to_green()],
            preferred_video_codec: None,
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            negotiation_timeout_ms: 10_000,
            frame_channel_capacity: 64,
            max_pending_candidates: 64,
        }
    }
}

impl LinkConfig {
    /// Link whose far end is a middlebox
    ///
    /// Frames are transformed on the way out of A; B has no frame access and
    /// hands the transformed frames straight to its sink.
    pub fn middlebox(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: LinkRole::Relay,
            initiator: EndpointConfig::intercepting(),
            responder: EndpointConfig::default(),
            transforms: TransformPlacement::SenderOnly,
            ..Default::default()
        }
    }

    /// Link whose far end inverts the transform and renders original media
    pub fn end_to_end(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: LinkRole::Terminal,
            initiator: EndpointConfig::intercepting(),
            responder: EndpointConfig::intercepting(),
            transforms: TransformPlacement::Both,
            ..Default::default()
        }
    }

    /// Set the preferred video codec
    pub fn with_preferred_video_codec(mut self, mime_type: impl Into<String>) -> Self {
        self.preferred_video_codec = Some(mime_type.into());
        self
    }

    /// Negotiation step timeout
    pub fn negotiation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.negotiation_timeout_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name` is empty
    /// - `negotiation_timeout_ms` is not in range 100-120000
    /// - `frame_channel_capacity` is not in range 1-4096
    /// - `max_pending_candidates` is zero
    /// - a rewrite has an empty `find`
    /// - `preferred_video_codec` is not a `video/...` mime type
    /// - an ICE server URL is not `stun:`, `turn:` or `turns:`
    /// - transforms are placed on an endpoint without frame interception
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("link name must not be empty".to_string()));
        }

        if !(100..=120_000).contains(&self.negotiation_timeout_ms) {
            return Err(Error::InvalidConfig(format!(
                "negotiation_timeout_ms must be in range 100-120000, got {}",
                self.negotiation_timeout_ms
            )));
        }

        if self.frame_channel_capacity == 0 || self.frame_channel_capacity > 4096 {
            return Err(Error::InvalidConfig(format!(
                "frame_channel_capacity must be in range 1-4096, got {}",
                self.frame_channel_capacity
            )));
        }

        if self.max_pending_candidates == 0 {
            return Err(Error::InvalidConfig(
                "max_pending_candidates must be at least 1".to_string(),
            ));
        }

        if let Some(rule) = self.offer_rewrites.iter().find(|r| r.find.is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "offer rewrite has an empty pattern (replacement {:?})",
                rule.replace
            )));
        }

        if let Some(codec) = &self.preferred_video_codec {
            let valid = codec
                .split_once('/')
                .map(|(kind, name)| kind.eq_ignore_ascii_case("video") && !name.is_empty())
                .unwrap_or(false);
            if !valid {
                return Err(Error::InvalidConfig(format!(
                    "preferred_video_codec must look like video/<name>, got {}",
                    codec
                )));
            }
        }

        for server in &self.ice_servers {
            if !server.starts_with("stun:")
                && !server.starts_with("turn:")
                && !server.starts_with("turns:")
            {
                return Err(Error::InvalidConfig(format!(
                    "ICE server must start with stun:, turn: or turns:, got {}",
                    server
                )));
            }
        }

        if self.transforms.sender() && !self.initiator.enable_frame_interception {
            return Err(Error::InvalidConfig(format!(
                "link {} places a sender transform on an initiator without frame interception",
                self.name
            )));
        }
        if self.transforms.receiver() && !self.responder.enable_frame_interception {
            return Err(Error::InvalidConfig(format!(
                "link {} places a receiver transform on a responder without frame interception",
                self.name
            )));
        }

        Ok(())
    }
}

/// Everything the relay demo needs to build a topology
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Constraints for the synthetic capture source
    pub capture: CaptureConstraints,

    /// Payload transform shared by all links
    pub transform: TransformConfig,

    /// Links built against the source, in start order
    pub links: Vec<LinkConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConstraints::default(),
            transform: TransformConfig::default(),
            links: vec![
                LinkConfig::middlebox("start-to-middle"),
                LinkConfig::end_to_end("start-to-end"),
            ],
        }
    }
}

impl RelayConfig {
    /// Load from a YAML, TOML or JSON file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let config: Self = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&text)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?,
            "toml" => toml::from_str(&text)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?,
            "json" => serde_json::from_str(&text)?,
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unsupported config format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate capture, transform and every link
    pub fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        self.transform.validate()?;

        if self.links.is_empty() {
            return Err(Error::InvalidConfig("at least one link is required".to_string()));
        }

        let mut names = std::collections::HashSet::new();
        for link in &self.links {
            link.validate()?;
            if !names.insert(link.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate link name {}",
                    link.name
                )));
            }
        }

        Ok(())
    }
}
