//! Synthetic capture device
//!
//! Produces VP8-shaped video frames (a real frame tag, plus start code and
//! dimensions on key frames) and Opus-shaped audio packets (a real TOC byte)
//! with random bodies, paced in real time.

use crate::media::{CaptureConstraints, CaptureDevice, MediaSample, MediaSource, MediaTrack};
use crate::{Error, Result};
use async_trait::async_trait;
use framerelay_core::data::{OpusToc, Vp8FrameHeader};
use framerelay_core::{FrameType, MediaKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Opus packet duration
pub const AUDIO_PACKET_INTERVAL: Duration = Duration::from_millis(20);

/// Opus configuration 15: hybrid, fullband, 20 ms
const OPUS_CONFIG: u8 = 15;

/// Capture device generating synthetic encoded media
#[derive(Debug, Clone, Default)]
pub struct SyntheticCapture {
    deny: bool,
    seed: Option<u64>,
}

impl SyntheticCapture {
    /// Device that grants access
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that refuses access, like a user declining a permission prompt
    pub fn denied() -> Self {
        Self {
            deny: true,
            seed: None,
        }
    }

    /// Use a fixed RNG seed for payload bodies
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Build one VP8-shaped frame
pub fn vp8_frame<R: Rng>(rng: &mut R, key: bool, width: u16, height: u16) -> Vec<u8> {
    let body_len: usize = if key {
        rng.gen_range(1_500..4_000)
    } else {
        rng.gen_range(150..1_200)
    };
    let header = if key {
        Vp8FrameHeader::key(width, height, (body_len / 3) as u32)
    } else {
        Vp8FrameHeader::delta((body_len / 3) as u32)
    };

    let mut frame = header.to_bytes();
    frame.extend((0..body_len).map(|_| rng.gen::<u8>()));
    frame
}

/// Build one Opus-shaped packet
pub fn opus_packet<R: Rng>(rng: &mut R) -> Vec<u8> {
    let body_len: usize = rng.gen_range(40..160);
    let mut packet = Vec::with_capacity(body_len + 1);
    packet.push(OpusToc::new(OPUS_CONFIG, false, 0).to_byte());
    packet.extend((0..body_len).map(|_| rng.gen::<u8>()));
    packet
}

async fn produce(
    constraints: CaptureConstraints,
    video: Option<MediaTrack>,
    audio: Option<MediaTrack>,
    seed: u64,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Instant::now();

    let mut video_tick = tokio::time::interval(constraints.frame_interval());
    video_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut audio_tick = tokio::time::interval(AUDIO_PACKET_INTERVAL);
    audio_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut frame_index = 0u64;

    loop {
        tokio::select! {
            _ = video_tick.tick(), if video.is_some() => {
                let Some(track) = &video else { continue };
                let key = frame_index % u64::from(constraints.keyframe_interval) == 0;
                frame_index += 1;
                let payload = vp8_frame(&mut rng, key, constraints.width, constraints.height);
                let frame_type = if key { FrameType::Key } else { FrameType::Delta };
                let _ = track.push(MediaSample::video(frame_type, payload, start.elapsed()));
            }
            _ = audio_tick.tick(), if audio.is_some() => {
                let Some(track) = &audio else { continue };
                let _ = track.push(MediaSample::audio(opus_packet(&mut rng), start.elapsed()));
            }
        }
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaSource> {
        if self.deny {
            return Err(Error::Capture("permission denied".to_string()));
        }
        constraints.validate()?;

        let video = constraints.video.then(|| MediaTrack::new(MediaKind::Video));
        let audio = constraints.audio.then(|| MediaTrack::new(MediaKind::Audio));
        let tracks: Vec<MediaTrack> = audio.iter().chain(video.iter()).cloned().collect();

        let source = MediaSource::new(format!("synthetic-{}", uuid::Uuid::new_v4()), tracks);
        let seed = self.seed.unwrap_or_else(rand::random);

        debug!(
            source = %source.id(),
            width = constraints.width,
            height = constraints.height,
            framerate = constraints.framerate,
            "Starting synthetic capture"
        );
        source.attach_producer(tokio::spawn(produce(
            constraints.clone(),
            video,
            audio,
            seed,
        )));

        info!("Acquired synthetic source {}", source.id());
        Ok(source)
    }
}
