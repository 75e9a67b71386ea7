//! Relay links
//!
//! A link pairs two endpoints, negotiates them over its own signaling
//! channel and carries the source's tracks from A to B, optionally through a
//! frame transform on either side.

pub mod candidates;
mod pump;
pub mod relay;
pub mod state;
pub mod stats;

pub use candidates::{CandidateGate, Delivery, GateStats};
pub use relay::RelayLink;
pub use state::LinkState;
pub use stats::LinkStats;
