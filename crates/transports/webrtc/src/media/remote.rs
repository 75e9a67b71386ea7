//! Remote tracks and render sinks

use framerelay_core::{EncodedFrame, MediaKind};
use tokio::sync::mpsc;

/// A track received by an endpoint
///
/// Frames arrive after any receiver-side transform has run.
#[derive(Debug)]
pub struct RemoteTrack {
    id: String,
    kind: MediaKind,
    stream_id: String,
    mid: String,
    frames: mpsc::Receiver<EncodedFrame>,
}

impl RemoteTrack {
    /// Wrap a receiver's frame stream
    pub fn new(
        id: impl Into<String>,
        kind: MediaKind,
        stream_id: impl Into<String>,
        mid: impl Into<String>,
        frames: mpsc::Receiver<EncodedFrame>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            mid: mid.into(),
            frames,
        }
    }

    /// Track ID announced by the remote side
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Stream ID announced by the remote side
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Media section ID the track was negotiated on
    pub fn mid(&self) -> &str {
        &self.mid
    }

    /// Next frame, `None` once the receiver is gone
    pub async fn recv(&mut self) -> Option<EncodedFrame> {
        self.frames.recv().await
    }

    /// Take the raw frame stream
    pub fn into_frames(self) -> mpsc::Receiver<EncodedFrame> {
        self.frames
    }
}

/// Destination for received tracks
///
/// The sink owns the track from then on; nothing is returned to the link.
pub trait RenderSink: Send + Sync {
    /// Take ownership of a newly received track
    fn render(&self, track: RemoteTrack);
}

/// Sink that drains and discards every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl RenderSink for DiscardSink {
    fn render(&self, track: RemoteTrack) {
        let mut frames = track.into_frames();
        tokio::spawn(async move { while frames.recv().await.is_some() {} });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_track_recv() {
        let (tx, rx) = mpsc::channel(4);
        let mut track = RemoteTrack::new("t", MediaKind::Audio, "s", "0", rx);
        tx.send(EncodedFrame::audio(vec![1])).await.unwrap();
        drop(tx);

        assert_eq!(track.mid(), "0");
        assert_eq!(track.recv().await.unwrap().data.as_ref(), &[1]);
        assert!(track.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_discard_sink_drains() {
        let (tx, rx) = mpsc::channel(1);
        DiscardSink.render(RemoteTrack::new("t", MediaKind::Video, "s", "1", rx));
        for _ in 0..8 {
            tx.send(EncodedFrame::audio(vec![0])).await.unwrap();
        }
    }
}
