//! Middlebox observer
//!
//! A render sink for the far end of a relay link. It cannot undo the
//! transform, but the codec headers in front of the transformed region stay
//! readable, so it classifies frames the way a forwarding unit would: key or
//! delta, dimensions, Opus configuration.

use crate::media::{RemoteTrack, RenderSink};
use framerelay_core::data::{OpusToc, Vp8FrameHeader};
use framerelay_core::transform::{TRAILER_LEN, TRAILER_MAGIC};
use framerelay_core::{EncodedFrame, FrameType, MediaKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// What the observer has seen so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObserverStats {
    /// Video frames received
    pub video_frames: u64,
    /// Audio frames received
    pub audio_frames: u64,
    /// Video frames whose header says key frame
    pub key_frames: u64,
    /// Video frames whose header says delta frame
    pub delta_frames: u64,
    /// Frames whose codec header did not parse
    pub unparseable: u64,
    /// Frames ending in the transform trailer
    pub transformed: u64,
    /// Payload bytes received
    pub bytes: u64,
    /// Dimensions from the latest key frame
    pub last_dimensions: Option<(u16, u16)>,
    /// Opus configuration number of the latest audio frame
    pub last_opus_config: Option<u8>,
}

impl ObserverStats {
    /// Frames of both kinds
    pub fn total_frames(&self) -> u64 {
        self.video_frames + self.audio_frames
    }
}

#[derive(Default)]
struct Shared {
    stats: Mutex<ObserverStats>,
    notify: Notify,
}

/// Render sink that inspects frames without decoding them
///
/// Clones share counters, so one clone can be handed to a link while
/// another is kept for reading statistics.
#[derive(Clone)]
pub struct MiddleboxObserver {
    label: Arc<str>,
    shared: Arc<Shared>,
}

impl MiddleboxObserver {
    /// Create an observer
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Arc::from(label.into()),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Observer label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ObserverStats {
        self.shared.stats.lock().clone()
    }

    /// Classify one frame
    pub fn observe(&self, frame: &EncodedFrame) {
        let payload = frame.data.as_ref();
        let trailer = payload.len() >= TRAILER_LEN
            && payload[payload.len() - TRAILER_LEN..payload.len() - 1] == TRAILER_MAGIC;

        {
            let mut stats = self.shared.stats.lock();
            stats.bytes += payload.len() as u64;
            if trailer {
                stats.transformed += 1;
            }

            match frame.kind {
                MediaKind::Video => {
                    stats.video_frames += 1;
                    match Vp8FrameHeader::parse(payload) {
                        Ok(header) => {
                            match header.frame_type {
                                FrameType::Key => stats.key_frames += 1,
                                _ => stats.delta_frames += 1,
                            }
                            if header.dimensions.is_some() {
                                stats.last_dimensions = header.dimensions;
                            }
                        }
                        Err(e) => {
                            stats.unparseable += 1;
                            trace!(observer = %self.label, "Unreadable video header: {}", e);
                        }
                    }
                }
                MediaKind::Audio => {
                    stats.audio_frames += 1;
                    match OpusToc::parse(payload) {
                        Ok(toc) => stats.last_opus_config = Some(toc.config),
                        Err(_) => stats.unparseable += 1,
                    }
                }
            }
        }

        self.shared.notify.notify_waiters();
    }

    /// Wait until at least `count` frames were observed
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_frames(&self, count: u64, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.shared.notify.notified();
                if self.shared.stats.lock().total_frames() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

impl RenderSink for MiddleboxObserver {
    fn render(&self, track: RemoteTrack) {
        debug!(
            observer = %self.label,
            kind = %track.kind(),
            "Observing track {}",
            track.id()
        );
        let observer = self.clone();
        let mut frames = track.into_frames();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                observer.observe(&frame);
            }
        });
    }
}
