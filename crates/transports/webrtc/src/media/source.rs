//! Local media sources
//!
//! A [`MediaSource`] is a set of [`MediaTrack`]s produced by a capture
//! device. Links never write to a source: each sender subscribes to a track's
//! broadcast feed and receives every sample pushed after it subscribed.

use crate::{Error, Result};
use bytes::Bytes;
use framerelay_core::{EncodedFrame, FrameType, MediaKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Broadcast capacity per track
pub const DEFAULT_TRACK_CAPACITY: usize = 256;

/// One encoded unit produced by a capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    /// Media kind
    pub kind: MediaKind,
    /// Key/delta classification (audio is undifferentiated)
    pub frame_type: FrameType,
    /// Encoded payload
    pub payload: Bytes,
    /// Capture time relative to the start of the source
    pub timestamp: Duration,
}

impl MediaSample {
    /// Video sample
    pub fn video(frame_type: FrameType, payload: impl Into<Bytes>, timestamp: Duration) -> Self {
        Self {
            kind: MediaKind::Video,
            frame_type,
            payload: payload.into(),
            timestamp,
        }
    }

    /// Audio sample
    pub fn audio(payload: impl Into<Bytes>, timestamp: Duration) -> Self {
        Self {
            kind: MediaKind::Audio,
            frame_type: FrameType::Undifferentiated,
            payload: payload.into(),
            timestamp,
        }
    }

    /// Re-publish a received frame as a sample, keeping its payload as is
    pub fn from_frame(frame: &EncodedFrame, timestamp: Duration) -> Self {
        Self {
            kind: frame.kind,
            frame_type: frame.frame_type,
            payload: frame.data.clone(),
            timestamp,
        }
    }
}

struct TrackInner {
    id: String,
    kind: MediaKind,
    feed: broadcast::Sender<MediaSample>,
}

/// A single local audio or video track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a track with a fresh ID
    pub fn new(kind: MediaKind) -> Self {
        Self::with_capacity(kind, DEFAULT_TRACK_CAPACITY)
    }

    /// Create a track with a given broadcast capacity
    pub fn with_capacity(kind: MediaKind, capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                feed,
            }),
        }
    }

    /// Track ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Publish a sample to every subscriber
    ///
    /// Returns the number of subscribers that will see it (zero is not an error).
    pub fn push(&self, sample: MediaSample) -> Result<usize> {
        if sample.kind != self.inner.kind {
            return Err(Error::MediaTrack(format!(
                "{} sample pushed to {} track {}",
                sample.kind, self.inner.kind, self.inner.id
            )));
        }
        Ok(self.inner.feed.send(sample).unwrap_or(0))
    }

    /// Subscribe to samples pushed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MediaSample> {
        self.inner.feed.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.feed.receiver_count()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

struct SourceInner {
    id: String,
    tracks: Vec<MediaTrack>,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SourceInner {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.get_mut().take() {
            handle.abort();
        }
    }
}

/// A captured media stream, shared read-only by every link built on it
#[derive(Clone)]
pub struct MediaSource {
    inner: Arc<SourceInner>,
}

impl MediaSource {
    /// Create a source from its tracks
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                id: id.into(),
                tracks,
                producer: Mutex::new(None),
            }),
        }
    }

    /// Tie a producer task to this source; it is aborted on [`stop`](Self::stop)
    /// or when the last handle is dropped
    pub fn attach_producer(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.inner.producer.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop the producer, if any
    pub fn stop(&self) {
        if let Some(handle) = self.inner.producer.lock().take() {
            debug!(source = %self.inner.id, "Stopping media producer");
            handle.abort();
        }
    }

    /// Source ID (used as the SDP stream ID)
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// All tracks in capture order
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    /// First track of a kind
    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.inner.tracks.iter().find(|t| t.kind() == kind)
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks)
            .finish()
    }
}

/// What to ask a capture device for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    /// Capture video
    pub video: bool,
    /// Capture audio
    pub audio: bool,
    /// Frame width in pixels (default: 640)
    pub width: u16,
    /// Frame height in pixels (default: 480)
    pub height: u16,
    /// Frames per second (default: 30)
    pub framerate: u32,
    /// A key frame every N video frames (default: 30)
    pub keyframe_interval: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            width: 640,
            height: 480,
            framerate: 30,
            keyframe_interval: 30,
        }
    }
}

impl CaptureConstraints {
    /// Validate constraint values
    pub fn validate(&self) -> Result<()> {
        if !self.video && !self.audio {
            return Err(Error::InvalidConfig(
                "capture must request audio, video or both".to_string(),
            ));
        }
        if self.video {
            if !(16..=4096).contains(&self.width) || !(16..=4096).contains(&self.height) {
                return Err(Error::InvalidConfig(format!(
                    "capture size must be within 16x16..4096x4096, got {}x{}",
                    self.width, self.height
                )));
            }
            if !(1..=120).contains(&self.framerate) {
                return Err(Error::InvalidConfig(format!(
                    "framerate must be in range 1-120, got {}",
                    self.framerate
                )));
            }
            if self.keyframe_interval == 0 {
                return Err(Error::InvalidConfig(
                    "keyframe_interval must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Interval between video frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.framerate.max(1)))
    }
}

/// A capture device that yields a media source
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire a source matching the constraints
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capture`] when the device is unavailable or access is
    /// denied. The failure is terminal for that source.
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaSource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out() {
        let track = MediaTrack::new(MediaKind::Video);
        let mut a = track.subscribe();
        let mut b = track.subscribe();

        let sample = MediaSample::video(FrameType::Key, vec![1, 2, 3], Duration::ZERO);
        assert_eq!(track.push(sample.clone()).unwrap(), 2);

        assert_eq!(a.recv().await.unwrap(), sample);
        assert_eq!(b.recv().await.unwrap(), sample);
    }

    #[test]
    fn test_push_without_subscribers() {
        let track = MediaTrack::new(MediaKind::Audio);
        let sample = MediaSample::audio(vec![0xfc], Duration::ZERO);
        assert_eq!(track.push(sample).unwrap(), 0);
    }

    #[test]
    fn test_kind_mismatch() {
        let track = MediaTrack::new(MediaKind::Audio);
        let sample = MediaSample::video(FrameType::Delta, vec![1], Duration::ZERO);
        assert!(matches!(track.push(sample), Err(Error::MediaTrack(_))));
    }

    #[test]
    fn test_source_lookup() {
        let source = MediaSource::new(
            "s",
            vec![MediaTrack::new(MediaKind::Audio), MediaTrack::new(MediaKind::Video)],
        );
        assert_eq!(source.tracks().len(), 2);
        assert_eq!(source.track(MediaKind::Video).unwrap().kind(), MediaKind::Video);
        assert_eq!(source.id(), "s");
    }

    #[test]
    fn test_constraints_validate() {
        assert!(CaptureConstraints::default().validate().is_ok());

        let none = CaptureConstraints {
            video: false,
            audio: false,
            ..Default::default()
        };
        assert!(none.validate().is_err());

        let tiny = CaptureConstraints {
            width: 2,
            ..Default::default()
        };
        assert!(tiny.validate().is_err());

        assert_eq!(
            CaptureConstraints::default().frame_interval(),
            Duration::from_micros(33_333)
        );
    }

    #[tokio::test]
    async fn test_stop_aborts_producer() {
        let source = MediaSource::new("s", vec![]);
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        source.attach_producer(handle);
        source.stop();
        // stopping twice is fine
        source.stop();
    }
}
