//! Media sources, remote tracks and render sinks

pub mod remote;
pub mod source;

pub use remote::{DiscardSink, RemoteTrack, RenderSink};
pub use source::{
    CaptureConstraints, CaptureDevice, MediaSample, MediaSource, MediaTrack,
    DEFAULT_TRACK_CAPACITY,
};
