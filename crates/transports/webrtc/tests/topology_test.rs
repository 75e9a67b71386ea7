//! Topology integration tests
//!
//! One capture fanned out to a middlebox and an end-to-end destination,
//! partial failures, configuration-driven topologies and chained hops.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use framerelay_core::data::{OpusToc, Vp8FrameHeader};
use framerelay_core::transform::TRAILER_MAGIC;
use framerelay_core::{FrameTransform, FrameType, MediaKind, ShiftTransform, TransformConfig};
use framerelay_webrtc::{
    CaptureConstraints, CaptureDevice, Error, LinkConfig, LinkState, LoopbackSubstrate,
    MediaSample, MiddleboxObserver, RelayConfig, RelaySink, RenderSink, SdpRewrite,
    SyntheticCapture, Topology, TransformPlacement, TransportSubstrate, END_TO_END_LINK, MIDDLEBOX_LINK,
};
use harness::{frame_type_at, init_logging, manual_source, vp8_payload, CollectingSink, WAIT};

fn constraints() -> CaptureConstraints {
    CaptureConstraints {
        framerate: 60,
        keyframe_interval: 10,
        ..Default::default()
    }
}

fn has_trailer(data: &[u8]) -> bool {
    data.len() > TRAILER_MAGIC.len() && data[..data.len() - 1].ends_with(&TRAILER_MAGIC)
}

#[tokio::test]
async fn test_middlebox_and_end_to_end_share_source() {
    init_logging();

    let source = SyntheticCapture::new()
        .with_seed(11)
        .acquire(&constraints())
        .await
        .unwrap();
    let observer = MiddleboxObserver::new("middlebox");
    let destination = CollectingSink::new();

    let topology = Topology::middlebox_and_end_to_end(
        Arc::new(LoopbackSubstrate::new()),
        source,
        Arc::new(ShiftTransform::default()),
        Arc::new(observer.clone()),
        Arc::new(destination.clone()),
    )
    .await
    .unwrap();
    assert_eq!(topology.links().len(), 2);

    topology.start_all().await.unwrap();
    for link in topology.links() {
        assert_eq!(link.state(), LinkState::Connected);
        link.wait_for_media(WAIT).await.unwrap();
    }

    assert!(observer.wait_for_frames(30, WAIT).await);
    assert!(destination.wait_for(MediaKind::Video, 20).await);
    assert!(destination.wait_for(MediaKind::Audio, 5).await);

    // the middlebox reads every header but gets transformed payloads
    let seen = observer.stats();
    assert_eq!(seen.unparseable, 0);
    assert_eq!(seen.transformed, seen.total_frames());
    assert!(seen.video_frames > 0);
    assert!(seen.audio_frames > 0);

    // the destination gets the original payloads back
    for frame in destination.frames_of(MediaKind::Video) {
        assert!(Vp8FrameHeader::parse(&frame.data).is_ok());
        assert!(!has_trailer(&frame.data));
    }
    for frame in destination.frames_of(MediaKind::Audio) {
        assert_eq!(OpusToc::parse(&frame.data).unwrap().config, 15);
        assert!(!has_trailer(&frame.data));
    }

    let middle = topology.link(MIDDLEBOX_LINK).unwrap().stats();
    assert!(middle.sender_transform.processed > 0);
    assert_eq!(middle.receiver_transform.processed, 0);
    let end = topology.link(END_TO_END_LINK).unwrap().stats();
    assert!(end.receiver_transform.processed > 0);
    assert_eq!(end.receiver_transform.dropped, 0);

    assert!(matches!(
        topology.link("nowhere"),
        Err(Error::LinkNotFound(_))
    ));

    topology.close_all().await;
    topology.close_all().await;
    assert!(topology.links().iter().all(|l| l.state() == LinkState::Closed));
    topology.source().stop();
}

#[tokio::test]
async fn test_failing_link_leaves_others_up() {
    init_logging();

    let source = manual_source("cam");
    let mut topology = Topology::new(Arc::new(LoopbackSubstrate::new()), source);
    let transform: Arc<dyn FrameTransform> = Arc::new(ShiftTransform::default());

    topology
        .add_link(
            LinkConfig::end_to_end("good"),
            Some(Arc::clone(&transform)),
            Arc::new(CollectingSink::new()),
        )
        .await
        .unwrap();

    let mut broken = LinkConfig::end_to_end("bad");
    broken.offer_rewrites.push(SdpRewrite::new("v=0", "v=7"));
    topology
        .add_link(broken, Some(transform), Arc::new(CollectingSink::new()))
        .await
        .unwrap();

    let err = topology.start_all().await.unwrap_err();
    assert!(matches!(err, Error::Negotiation(ref m) if m.contains("bad") && !m.contains("good")));

    assert_eq!(topology.link("good").unwrap().state(), LinkState::Connected);
    assert_eq!(topology.link("bad").unwrap().state(), LinkState::Closed);

    topology.close_all().await;
}

#[tokio::test]
async fn test_duplicate_link_name() {
    init_logging();

    let mut topology = Topology::new(Arc::new(LoopbackSubstrate::new()), manual_source("cam"));
    topology
        .add_link(LinkConfig::end_to_end("x"), None, Arc::new(CollectingSink::new()))
        .await
        .unwrap();
    let err = topology
        .add_link(LinkConfig::middlebox("x"), None, Arc::new(CollectingSink::new()))
        .await
        .err()
        .unwrap();
    assert!(err.is_config_error());
    assert_eq!(topology.links().len(), 1);

    topology.close_all().await;
}

#[tokio::test]
async fn test_from_config() {
    init_logging();

    let config = RelayConfig {
        transform: TransformConfig {
            shift: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let sinks = CollectingSink::new();
    let source = manual_source("cam");

    let topology = Topology::from_config(
        Arc::new(LoopbackSubstrate::new()),
        source,
        &config,
        |_| -> Arc<dyn RenderSink> { Arc::new(sinks.clone()) },
    )
    .await
    .unwrap();

    let names: Vec<_> = topology.links().iter().map(|l| l.name().to_string()).collect();
    assert_eq!(names, vec![MIDDLEBOX_LINK, END_TO_END_LINK]);

    topology.start_all().await.unwrap();
    assert!(topology
        .stats()
        .iter()
        .all(|s| s.state == LinkState::Connected));

    topology.close_all().await;
}

#[tokio::test]
async fn test_chained_hops_restore_original() {
    init_logging();

    let substrate: Arc<dyn TransportSubstrate> = Arc::new(LoopbackSubstrate::new());
    let origin = manual_source("origin");
    let relay = RelaySink::new("relay");
    let destination = CollectingSink::new();
    let transform: Arc<dyn FrameTransform> = Arc::new(ShiftTransform::default());

    // hop 1 transforms and leaves the frames transformed at the relay
    let mut first = Topology::new(Arc::clone(&substrate), origin.clone());
    let relay_source = relay.source().clone();
    first
        .add_link(LinkConfig::middlebox("hop-1"), Some(Arc::clone(&transform)), Arc::new(relay))
        .await
        .unwrap();

    // hop 2 forwards untouched and inverts at the far end
    let mut second = Topology::new(substrate, relay_source);
    let mut config = LinkConfig::end_to_end("hop-2");
    config.transforms = TransformPlacement::ReceiverOnly;
    second
        .add_link(config, Some(transform), Arc::new(destination.clone()))
        .await
        .unwrap();

    first.start_all().await.unwrap();
    second.start_all().await.unwrap();
    for link in first.links().iter().chain(second.links()) {
        link.wait_for_media(WAIT).await.unwrap();
    }

    let track = origin.track(MediaKind::Video).unwrap();
    let sent: Vec<Vec<u8>> = (0..6u8)
        .map(|i| {
            let payload = vp8_payload(frame_type_at(i) == FrameType::Key, i);
            track
                .push(MediaSample::video(
                    frame_type_at(i),
                    payload.clone(),
                    Duration::from_millis(u64::from(i) * 33),
                ))
                .unwrap();
            payload
        })
        .collect();

    assert!(destination.wait_for(MediaKind::Video, 6).await);
    let received = destination.frames_of(MediaKind::Video);
    for (frame, original) in received.iter().zip(&sent) {
        assert_eq!(frame.data.as_ref(), original.as_slice());
    }

    let hop2 = second.link("hop-2").unwrap().stats();
    assert_eq!(hop2.sender_transform.processed, 0);
    assert_eq!(hop2.receiver_transform.processed, 6);

    second.close_all().await;
    first.close_all().await;
}

#[tokio::test]
async fn test_capture_denied() {
    init_logging();

    let err = SyntheticCapture::denied()
        .acquire(&constraints())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Capture(_)));
    assert!(err.is_terminal());
}
