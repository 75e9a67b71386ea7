//! Relay link test harness
//!
//! Provides:
//! - Logging setup shared by all integration tests
//! - [`CollectingSink`], a render sink that records every frame it receives
//! - [`ScriptedSubstrate`], loopback endpoints with delayed answers and early
//!   candidates, for exercising timeouts, close-during-negotiation and
//!   candidate buffering
//! - Helpers for building hand-fed media sources and VP8-shaped frames

#![allow(dead_code)]

pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use framerelay_core::data::Vp8FrameHeader;
use framerelay_core::{EncodedFrame, FrameType, MediaKind};
use framerelay_webrtc::{MediaSource, MediaTrack, RemoteTrack, RenderSink};
use parking_lot::Mutex;
use tokio::sync::Notify;

pub use scripted::{early_candidate, ScriptedSubstrate};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,framerelay_webrtc=debug,framerelay_core=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Collected {
    frames: Mutex<Vec<EncodedFrame>>,
    tracks: Mutex<Vec<(MediaKind, String)>>,
    notify: Notify,
}

/// Render sink that keeps every received frame
#[derive(Clone, Default)]
pub struct CollectingSink {
    inner: Arc<Collected>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received so far, in arrival order
    pub fn frames(&self) -> Vec<EncodedFrame> {
        self.inner.frames.lock().clone()
    }

    /// Frames of one kind
    pub fn frames_of(&self, kind: MediaKind) -> Vec<EncodedFrame> {
        self.inner
            .frames
            .lock()
            .iter()
            .filter(|f| f.kind == kind)
            .cloned()
            .collect()
    }

    /// Kinds and stream ids of the tracks handed to this sink
    pub fn tracks(&self) -> Vec<(MediaKind, String)> {
        self.inner.tracks.lock().clone()
    }

    /// Wait until `count` frames of `kind` arrived
    pub async fn wait_for(&self, kind: MediaKind, count: usize) -> bool {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.inner.notify.notified();
                if self.frames_of(kind).len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

impl RenderSink for CollectingSink {
    fn render(&self, track: RemoteTrack) {
        self.inner
            .tracks
            .lock()
            .push((track.kind(), track.stream_id().to_string()));

        let inner = Arc::clone(&self.inner);
        let mut frames = track.into_frames();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                inner.frames.lock().push(frame);
                inner.notify.notify_waiters();
            }
        });
    }
}

/// A source with one audio and one video track and no producer
///
/// Tests push samples into the tracks themselves.
pub fn manual_source(id: &str) -> MediaSource {
    MediaSource::new(
        id,
        vec![
            MediaTrack::new(MediaKind::Audio),
            MediaTrack::new(MediaKind::Video),
        ],
    )
}

/// VP8-shaped frame payload with a recognizable body
pub fn vp8_payload(key: bool, index: u8) -> Vec<u8> {
    let mut payload = if key {
        Vp8FrameHeader::key(320, 240, 64).to_bytes()
    } else {
        Vp8FrameHeader::delta(64).to_bytes()
    };
    payload.extend((0..48u8).map(|i| i.wrapping_mul(7).wrapping_add(index)));
    payload
}

/// Frame type for the `index`th frame of a stream with a key frame every 5
pub fn frame_type_at(index: u8) -> FrameType {
    if index % 5 == 0 {
        FrameType::Key
    } else {
        FrameType::Delta
    }
}
