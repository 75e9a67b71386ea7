//! Link topologies
//!
//! A [`Topology`] fans one media source out over several relay links. The
//! standard layout has two links sharing one capture:
//!
//! ```text
//!            +--> start-to-middle --> middlebox  (sees transformed frames)
//! source ----|
//!            +--> start-to-end ----> destination (sees original frames)
//! ```
//!
//! [`RelaySink`] turns what a link receives back into a source, so links can
//! be chained into multi-hop paths.

use crate::config::{LinkConfig, RelayConfig, TransformPlacement};
use crate::link::{LinkStats, RelayLink};
use crate::media::{MediaSample, MediaSource, MediaTrack, RemoteTrack, RenderSink};
use crate::substrate::TransportSubstrate;
use crate::{Error, Result};
use framerelay_core::{FrameTransform, MediaKind, ShiftTransform};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Name of the link towards the middlebox
pub const MIDDLEBOX_LINK: &str = "start-to-middle";

/// Name of the link towards the destination
pub const END_TO_END_LINK: &str = "start-to-end";

/// A set of relay links sharing one source
pub struct Topology {
    substrate: Arc<dyn TransportSubstrate>,
    source: MediaSource,
    links: Vec<Arc<RelayLink>>,
}

impl Topology {
    /// Empty topology around `source`
    pub fn new(substrate: Arc<dyn TransportSubstrate>, source: MediaSource) -> Self {
        Self {
            substrate,
            source,
            links: Vec::new(),
        }
    }

    /// The middlebox link plus the end-to-end link, both fed by `source`
    ///
    /// The middlebox link transforms on A only, so `middlebox` receives
    /// transformed frames. The end-to-end link transforms on A and inverts
    /// on B, so `destination` receives the original frames.
    pub async fn middlebox_and_end_to_end(
        substrate: Arc<dyn TransportSubstrate>,
        source: MediaSource,
        transform: Arc<dyn FrameTransform>,
        middlebox: Arc<dyn RenderSink>,
        destination: Arc<dyn RenderSink>,
    ) -> Result<Self> {
        let mut topology = Self::new(substrate, source);
        let links = [
            (LinkConfig::middlebox(MIDDLEBOX_LINK), middlebox),
            (LinkConfig::end_to_end(END_TO_END_LINK), destination),
        ];
        for (config, sink) in links {
            if let Err(e) = topology
                .add_link(config, Some(Arc::clone(&transform)), sink)
                .await
            {
                topology.close_all().await;
                return Err(e);
            }
        }
        Ok(topology)
    }

    /// Build every link of a relay configuration
    ///
    /// `sink_for` picks the render sink of each link. All links share one
    /// [`ShiftTransform`] built from `config.transform`.
    pub async fn from_config<F>(
        substrate: Arc<dyn TransportSubstrate>,
        source: MediaSource,
        config: &RelayConfig,
        sink_for: F,
    ) -> Result<Self>
    where
        F: Fn(&LinkConfig) -> Arc<dyn RenderSink>,
    {
        config.validate()?;
        let transform: Arc<dyn FrameTransform> = Arc::new(ShiftTransform::new(&config.transform)?);

        let mut topology = Self::new(substrate, source);
        for link in &config.links {
            let sink = sink_for(link);
            if let Err(e) = topology
                .add_link(link.clone(), Some(Arc::clone(&transform)), sink)
                .await
            {
                topology.close_all().await;
                return Err(e);
            }
        }
        Ok(topology)
    }

    /// Add a link fed by this topology's source
    ///
    /// `transform` is attached where `config.transforms` says.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a duplicate link name, or any
    /// error from creating the link or attaching the transform.
    pub async fn add_link(
        &mut self,
        config: LinkConfig,
        transform: Option<Arc<dyn FrameTransform>>,
        sink: Arc<dyn RenderSink>,
    ) -> Result<Arc<RelayLink>> {
        if self.links.iter().any(|l| l.name() == config.name) {
            return Err(Error::InvalidConfig(format!(
                "duplicate link name {}",
                config.name
            )));
        }

        let placement = config.transforms;
        let link = RelayLink::new(config, self.substrate.as_ref(), &self.source, sink).await?;

        if let Some(transform) = transform {
            if let Err(e) = attach_transforms(&link, placement, transform) {
                link.close().await;
                return Err(e);
            }
        }

        let link = Arc::new(link);
        self.links.push(Arc::clone(&link));
        Ok(link)
    }

    /// Negotiate every link concurrently
    ///
    /// A failing link is closed on its own; the others stay up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Negotiation`] naming every link that failed.
    pub async fn start_all(&self) -> Result<()> {
        let results = join_all(self.links.iter().map(|link| async move {
            let result = link.start().await;
            (link.name().to_string(), result)
        }))
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| format!("{}: {}", name, e)))
            .collect();

        if failures.is_empty() {
            info!("All {} links connected", self.links.len());
            return Ok(());
        }

        error!(
            "{} of {} links failed to connect",
            failures.len(),
            self.links.len()
        );
        Err(Error::Negotiation(failures.join("; ")))
    }

    /// Close every link (idempotent)
    pub async fn close_all(&self) {
        join_all(self.links.iter().map(|link| link.close())).await;
        info!("Closed {} links", self.links.len());
    }

    /// Links in creation order
    pub fn links(&self) -> &[Arc<RelayLink>] {
        &self.links
    }

    /// Look up a link by name
    pub fn link(&self, name: &str) -> Result<&Arc<RelayLink>> {
        self.links
            .iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))
    }

    /// Shared source
    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// Statistics of every link
    pub fn stats(&self) -> Vec<LinkStats> {
        self.links.iter().map(|l| l.stats()).collect()
    }
}

fn attach_transforms(
    link: &RelayLink,
    placement: TransformPlacement,
    transform: Arc<dyn FrameTransform>,
) -> Result<()> {
    if placement.sender() {
        link.attach_sender_transform(Arc::clone(&transform))?;
    }
    if placement.receiver() {
        link.attach_receiver_transform(transform)?;
    }
    Ok(())
}

/// Render sink that republishes received frames as a new source
///
/// Frames are passed on unchanged, so a transformed stream stays transformed
/// until some later link inverts it.
pub struct RelaySink {
    source: MediaSource,
    started: Instant,
}

impl RelaySink {
    /// Create a sink with one audio and one video track
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            source: MediaSource::new(
                id,
                vec![
                    MediaTrack::new(MediaKind::Audio),
                    MediaTrack::new(MediaKind::Video),
                ],
            ),
            started: Instant::now(),
        }
    }

    /// Source carrying what this sink receives
    pub fn source(&self) -> &MediaSource {
        &self.source
    }
}

impl RenderSink for RelaySink {
    fn render(&self, track: RemoteTrack) {
        let Some(out) = self.source.track(track.kind()).cloned() else {
            warn!(source = %self.source.id(), "No outgoing {} track", track.kind());
            return;
        };

        let started = self.started;
        let mut frames = track.into_frames();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                // no subscribers yet is fine, the frame is just dropped
                let _ = out.push(MediaSample::from_frame(&frame, started.elapsed()));
            }
        });
    }
}
