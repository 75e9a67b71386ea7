//! Link statistics

use super::candidates::GateStats;
use super::state::LinkState;
use crate::config::LinkRole;
use framerelay_core::{Direction, TransformStats, TransformStatsSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared by a link and its background tasks
#[derive(Default)]
pub(crate) struct LinkCounters {
    candidates_relayed: AtomicU64,
    passthrough_frames: AtomicU64,
    remote_tracks: AtomicU64,
    forward: Mutex<Vec<Arc<TransformStats>>>,
    inverse: Mutex<Vec<Arc<TransformStats>>>,
}

impl LinkCounters {
    pub fn record_candidate_relayed(&self) {
        self.candidates_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_track(&self) {
        self.remote_tracks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn register_pipeline(&self, direction: Direction, stats: Arc<TransformStats>) {
        match direction {
            Direction::Forward => self.forward.lock().push(stats),
            Direction::Inverse => self.inverse.lock().push(stats),
        }
    }

    pub fn passthrough(&self) -> u64 {
        self.passthrough_frames.load(Ordering::Relaxed)
    }

    /// Sum over every pipeline of one direction
    pub fn transform_stats(&self, direction: Direction) -> TransformStatsSnapshot {
        let pipelines = match direction {
            Direction::Forward => self.forward.lock(),
            Direction::Inverse => self.inverse.lock(),
        };
        pipelines
            .iter()
            .map(|s| s.snapshot())
            .fold(TransformStatsSnapshot::default(), |acc, s| acc + s)
    }

    pub fn candidates_relayed(&self) -> u64 {
        self.candidates_relayed.load(Ordering::Relaxed)
    }

    pub fn remote_tracks(&self) -> u64 {
        self.remote_tracks.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a link
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    /// Link name
    pub name: String,
    /// Terminal or relay
    pub role: LinkRole,
    /// Current state
    pub state: LinkState,
    /// Candidates sent across the signaling channel, both directions
    pub candidates_relayed: u64,
    /// Candidate handling at both endpoints
    pub candidates: GateStats,
    /// Remote tracks surfaced at the responder
    pub remote_tracks: u64,
    /// Frames that crossed an intercepted stream with no transform attached
    pub passthrough_frames: u64,
    /// Forward transform counters over all senders
    pub sender_transform: TransformStatsSnapshot,
    /// Inverse transform counters over all receivers
    pub receiver_transform: TransformStatsSnapshot,
}
