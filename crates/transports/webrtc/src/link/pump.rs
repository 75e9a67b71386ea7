//! Frame pumps between intercepted streams
//!
//! Every intercepted sender or receiver gets one pump. The pump forwards
//! frames unchanged until a transform lands in its [`TransformSlot`]; from
//! then on each frame goes through a [`TransformPipeline`] built for that
//! stream.

use super::stats::LinkCounters;
use crate::substrate::EncodedStreams;
use crate::{Error, Result};
use framerelay_core::{Direction, FrameTransform, TransformPipeline};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Holds the transform for one side of a link
#[derive(Clone, Default)]
pub(crate) struct TransformSlot {
    inner: Arc<RwLock<Option<Arc<dyn FrameTransform>>>>,
}

impl TransformSlot {
    /// Install a transform, at most once
    pub fn install(&self, transform: Arc<dyn FrameTransform>) -> Result<()> {
        let mut slot = self.inner.write();
        if let Some(existing) = slot.as_ref() {
            return Err(Error::InvalidState(format!(
                "transform {} already attached",
                existing.name()
            )));
        }
        *slot = Some(transform);
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<dyn FrameTransform>> {
        self.inner.read().clone()
    }
}

/// Move frames from `streams.readable` to `streams.writable`
///
/// Frames pass through untouched until the slot holds a transform; the rest
/// of the stream is then handed to [`TransformPipeline::run`].
pub(crate) async fn run_pump(
    slot: TransformSlot,
    direction: Direction,
    label: String,
    streams: EncodedStreams,
    counters: Arc<LinkCounters>,
) {
    let EncodedStreams {
        mut readable,
        writable,
    } = streams;

    debug!(stream = %label, ?direction, "Frame pump started");

    while let Some(frame) = readable.recv().await {
        let Some(transform) = slot.get() else {
            counters.record_passthrough();
            if writable.send(frame).await.is_err() {
                debug!(stream = %label, "Writable side closed");
                break;
            }
            continue;
        };

        debug!(stream = %label, transform = transform.name(), "Transform engaged");
        let pipeline = TransformPipeline::new(transform, direction, label.clone());
        counters.register_pipeline(direction, pipeline.stats());

        // the frame that found the transform goes through it as well
        match pipeline.process(frame) {
            Ok(Some(out)) => {
                if writable.send(out).await.is_err() {
                    debug!(stream = %label, "Writable side closed");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(stream = %label, "Transform failed: {}", e),
        }

        if let Err(e) = pipeline.run(readable, writable).await {
            warn!(stream = %label, "Transform pipeline stopped: {}", e);
        }
        return;
    }

    debug!(stream = %label, "Frame pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use framerelay_core::transform::TRAILER_LEN;
    use framerelay_core::{EncodedFrame, FrameType, ShiftTransform};
    use tokio::sync::mpsc;

    fn streams() -> (
        mpsc::Sender<EncodedFrame>,
        EncodedStreams,
        mpsc::Receiver<EncodedFrame>,
    ) {
        let (in_tx, readable) = mpsc::channel(8);
        let (writable, out_rx) = mpsc::channel(8);
        (in_tx, EncodedStreams { readable, writable }, out_rx)
    }

    #[test]
    fn test_slot_installs_once() {
        let slot = TransformSlot::default();
        assert!(slot.get().is_none());
        slot.install(Arc::new(ShiftTransform::default())).unwrap();
        assert!(slot.get().is_some());
        let err = slot
            .install(Arc::new(ShiftTransform::default()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_passthrough_then_transform() {
        let slot = TransformSlot::default();
        let counters = Arc::new(LinkCounters::default());
        let (tx, streams, mut rx) = streams();
        let pump = tokio::spawn(run_pump(
            slot.clone(),
            Direction::Forward,
            "tx0".to_string(),
            streams,
            Arc::clone(&counters),
        ));

        let frame = EncodedFrame::video(FrameType::Delta, vec![9u8; 10]);
        tx.send(frame.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), frame);
        assert_eq!(counters.passthrough(), 1);

        slot.install(Arc::new(ShiftTransform::default())).unwrap();
        tx.send(frame.clone()).await.unwrap();
        let out = rx.recv().await.unwrap();
        assert_eq!(out.len(), 10 + TRAILER_LEN);
        assert_eq!(&out.data[..3], &frame.data[..3]);

        drop(tx);
        pump.await.unwrap();
        assert_eq!(counters.transform_stats(Direction::Forward).processed, 1);
    }

    #[tokio::test]
    async fn test_inverse_pump_drops_corrupt_frames_and_continues() {
        let slot = TransformSlot::default();
        let transform = ShiftTransform::default();
        slot.install(Arc::new(transform.clone())).unwrap();

        let counters = Arc::new(LinkCounters::default());
        let (tx, streams, mut rx) = streams();
        let pump = tokio::spawn(run_pump(
            slot,
            Direction::Inverse,
            "rx0".to_string(),
            streams,
            Arc::clone(&counters),
        ));

        let first = EncodedFrame::video(FrameType::Key, vec![4u8; 16]);
        let second = EncodedFrame::video(FrameType::Delta, vec![5u8; 16]);
        tx.send(transform.forward(first.clone())).await.unwrap();
        tx.send(EncodedFrame::audio(vec![0x01, 0x02])).await.unwrap();
        tx.send(transform.forward(second.clone())).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), first);
        assert_eq!(rx.recv().await.unwrap(), second);
        assert!(rx.recv().await.is_none());
        pump.await.unwrap();

        let stats = counters.transform_stats(Direction::Inverse);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(counters.passthrough(), 0);
    }
}
