//! Streaming transform pipeline
//!
//! A [`TransformPipeline`] sits between the readable and writable halves of
//! one encoded-frame stream: frames are pulled from the readable side, run
//! through the transform in the configured [`Direction`], and pushed to the
//! writable side. One frame is processed at a time, in arrival order.
//!
//! Frames rejected by the inverse transform are dropped and counted; the
//! stream keeps going with the next frame.

use super::FrameTransform;
use crate::data::frame::EncodedFrame;
use crate::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Which half of the transform a pipeline applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Applied on a sender, before network emission
    Forward,
    /// Applied on a receiver, after network reception
    Inverse,
}

/// Counters kept by a single pipeline instance
#[derive(Debug, Default)]
pub struct TransformStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Point-in-time copy of [`TransformStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransformStatsSnapshot {
    /// Frames transformed and forwarded
    pub processed: u64,
    /// Frames dropped because the transform rejected them
    pub dropped: u64,
    /// Payload bytes read
    pub bytes_in: u64,
    /// Payload bytes written
    pub bytes_out: u64,
}

impl TransformStats {
    /// Take a snapshot of the counters
    pub fn snapshot(&self) -> TransformStatsSnapshot {
        TransformStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

impl std::ops::Add for TransformStatsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            processed: self.processed + rhs.processed,
            dropped: self.dropped + rhs.dropped,
            bytes_in: self.bytes_in + rhs.bytes_in,
            bytes_out: self.bytes_out + rhs.bytes_out,
        }
    }
}

/// One transform instance attached to one frame stream
pub struct TransformPipeline {
    transform: Arc<dyn FrameTransform>,
    direction: Direction,
    label: String,
    stats: Arc<TransformStats>,
}

impl TransformPipeline {
    /// Create a pipeline
    ///
    /// # Arguments
    ///
    /// * `transform` - Payload transform (may be shared, it holds no per-stream state)
    /// * `direction` - Forward on senders, inverse on receivers
    /// * `label` - Stream label used in log lines
    pub fn new(
        transform: Arc<dyn FrameTransform>,
        direction: Direction,
        label: impl Into<String>,
    ) -> Self {
        Self {
            transform,
            direction,
            label: label.into(),
            stats: Arc::new(TransformStats::default()),
        }
    }

    /// Direction this pipeline applies
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Shared handle to this pipeline's counters
    pub fn stats(&self) -> Arc<TransformStats> {
        Arc::clone(&self.stats)
    }

    /// Transform a single frame
    ///
    /// Returns `Ok(None)` when the frame was dropped.
    pub fn process(&self, frame: EncodedFrame) -> Result<Option<EncodedFrame>> {
        let len_in = frame.len() as u64;

        let result = match self.direction {
            Direction::Forward => Ok(self.transform.forward(frame)),
            Direction::Inverse => self.transform.inverse(frame),
        };

        match result {
            Ok(out) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_in.fetch_add(len_in, Ordering::Relaxed);
                self.stats
                    .bytes_out
                    .fetch_add(out.len() as u64, Ordering::Relaxed);
                Ok(Some(out))
            }
            Err(e) if e.is_frame_local() => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    stream = %self.label,
                    transform = self.transform.name(),
                    "Dropping frame: {}",
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Pump frames from `readable` through the transform into `writable`
    ///
    /// Runs until the readable side ends or the writable side is closed.
    pub async fn run(
        self,
        mut readable: mpsc::Receiver<EncodedFrame>,
        writable: mpsc::Sender<EncodedFrame>,
    ) -> Result<TransformStatsSnapshot> {
        debug!(
            stream = %self.label,
            direction = ?self.direction,
            transform = self.transform.name(),
            "Transform pipeline started"
        );

        while let Some(frame) = readable.recv().await {
            let Some(out) = self.process(frame)? else {
                continue;
            };

            if writable.send(out).await.is_err() {
                debug!(stream = %self.label, "Writable side closed, stopping pipeline");
                break;
            }
        }

        let snapshot = self.stats.snapshot();
        debug!(
            stream = %self.label,
            processed = snapshot.processed,
            dropped = snapshot.dropped,
            "Transform pipeline finished"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::FrameType;
    use crate::transform::{ShiftTransform, TRAILER_LEN};

    fn shift() -> Arc<dyn FrameTransform> {
        Arc::new(ShiftTransform::default())
    }

    #[test]
    fn test_process_forward_and_inverse() {
        let forward = TransformPipeline::new(shift(), Direction::Forward, "a");
        let inverse = TransformPipeline::new(shift(), Direction::Inverse, "b");

        let frame = EncodedFrame::video(FrameType::Key, vec![7u8; 32]);
        let sent = forward.process(frame.clone()).unwrap().unwrap();
        assert_eq!(sent.len(), 32 + TRAILER_LEN);

        let received = inverse.process(sent).unwrap().unwrap();
        assert_eq!(received, frame);

        let stats = forward.stats().snapshot();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.bytes_in, 32);
        assert_eq!(stats.bytes_out, 32 + TRAILER_LEN as u64);
    }

    #[test]
    fn test_corrupt_frame_dropped() {
        let inverse = TransformPipeline::new(shift(), Direction::Inverse, "rx");
        let out = inverse.process(EncodedFrame::audio(vec![1, 2])).unwrap();
        assert!(out.is_none());

        let stats = inverse.stats().snapshot();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_run_preserves_order_and_skips_corruption() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let transform = ShiftTransform::default();

        let pipeline = TransformPipeline::new(shift(), Direction::Inverse, "rx");
        let handle = tokio::spawn(pipeline.run(in_rx, out_tx));

        in_tx
            .send(transform.forward(EncodedFrame::video(FrameType::Key, vec![1u8; 12])))
            .await
            .unwrap();
        in_tx.send(EncodedFrame::audio(vec![0xaa])).await.unwrap();
        in_tx
            .send(transform.forward(EncodedFrame::video(FrameType::Delta, vec![2u8; 12])))
            .await
            .unwrap();
        drop(in_tx);

        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first.frame_type, FrameType::Key);
        assert_eq!(first.data.as_ref(), &[1u8; 12]);
        assert_eq!(second.frame_type, FrameType::Delta);
        assert_eq!(second.data.as_ref(), &[2u8; 12]);
        assert!(out_rx.recv().await.is_none());

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_snapshot_add() {
        let a = TransformStatsSnapshot {
            processed: 1,
            dropped: 2,
            bytes_in: 3,
            bytes_out: 4,
        };
        let sum = a + a;
        assert_eq!(sum.processed, 2);
        assert_eq!(sum.bytes_out, 8);
    }
}
