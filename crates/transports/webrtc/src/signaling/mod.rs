//! Signaling between the two endpoints of a link

pub mod channel;
pub mod protocol;

pub use channel::{InProcessSignaling, SignalingChannel};
pub use protocol::SignalingMessage;
