//! Candidate buffering
//!
//! A trickled candidate can reach an endpoint before that endpoint has a
//! remote description, which the endpoint would reject. [`CandidateGate`]
//! holds such candidates and flushes them, in arrival order, once the link
//! opens the gate after applying the remote description. After the gate is
//! closed every candidate is dropped without error.

use crate::substrate::TransportEndpoint;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// What happened to a delivered candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Added to the endpoint
    Applied,
    /// Held until the remote description is set
    Buffered,
    /// Dropped because the gate is closed
    Discarded,
    /// The endpoint refused it
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Open,
    Closed,
}

struct GateInner {
    phase: Phase,
    pending: VecDeque<RTCIceCandidateInit>,
}

/// Candidate counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    /// Candidates added to the endpoint
    pub applied: u64,
    /// Candidates that had to wait for the remote description
    pub buffered: u64,
    /// Candidates dropped (closed gate or overflow)
    pub discarded: u64,
    /// Candidates the endpoint refused
    pub rejected: u64,
}

impl std::ops::Add for GateStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            applied: self.applied + rhs.applied,
            buffered: self.buffered + rhs.buffered,
            discarded: self.discarded + rhs.discarded,
            rejected: self.rejected + rhs.rejected,
        }
    }
}

/// Buffers candidates for one endpoint until it can take them
pub struct CandidateGate {
    label: String,
    endpoint: Arc<dyn TransportEndpoint>,
    max_pending: usize,
    inner: Mutex<GateInner>,
    applied: AtomicU64,
    buffered: AtomicU64,
    discarded: AtomicU64,
    rejected: AtomicU64,
}

impl CandidateGate {
    /// Create a gate in front of `endpoint`
    pub fn new(endpoint: Arc<dyn TransportEndpoint>, max_pending: usize) -> Self {
        Self {
            label: endpoint.label().to_string(),
            endpoint,
            max_pending: max_pending.max(1),
            inner: Mutex::new(GateInner {
                phase: Phase::Waiting,
                pending: VecDeque::new(),
            }),
            applied: AtomicU64::new(0),
            buffered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Deliver a candidate from the peer
    pub async fn deliver(&self, candidate: RTCIceCandidateInit) -> Delivery {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            Phase::Closed => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %self.label, "Discarding candidate after close");
                Delivery::Discarded
            }
            Phase::Waiting => {
                if inner.pending.len() >= self.max_pending {
                    inner.pending.pop_front();
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        endpoint = %self.label,
                        max = self.max_pending,
                        "Candidate buffer full, dropping oldest candidate"
                    );
                }
                inner.pending.push_back(candidate);
                self.buffered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    endpoint = %self.label,
                    pending = inner.pending.len(),
                    "Buffering candidate until remote description is set"
                );
                Delivery::Buffered
            }
            // the lock stays held so candidates reach the endpoint in order
            Phase::Open => self.apply(candidate).await,
        }
    }

    /// Mark the remote description as applied and flush buffered candidates
    ///
    /// Returns the number of candidates flushed.
    pub async fn open(&self) -> usize {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Waiting {
            return 0;
        }
        inner.phase = Phase::Open;

        let pending: Vec<_> = inner.pending.drain(..).collect();
        let count = pending.len();
        for candidate in pending {
            self.apply(candidate).await;
        }
        if count > 0 {
            debug!(endpoint = %self.label, count = count, "Flushed buffered candidates");
        }
        count
    }

    /// Drop buffered candidates and discard everything that arrives later
    ///
    /// Returns the number of buffered candidates dropped.
    pub async fn close(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.phase = Phase::Closed;
        let dropped = inner.pending.len();
        inner.pending.clear();
        self.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    /// Candidates currently held
    pub async fn pending(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> GateStats {
        GateStats {
            applied: self.applied.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    async fn apply(&self, candidate: RTCIceCandidateInit) -> Delivery {
        match self.endpoint.add_ice_candidate(candidate).await {
            Ok(()) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                Delivery::Applied
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(endpoint = %self.label, "Candidate rejected: {}", e);
                Delivery::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::media::MediaTrack;
    use crate::substrate::loopback::LoopbackSubstrate;
    use crate::substrate::TransportSubstrate;
    use framerelay_core::MediaKind;

    fn host_candidate(port: u16) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 {} typ host", port),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    async fn pair() -> (Arc<dyn TransportEndpoint>, Arc<dyn TransportEndpoint>) {
        let substrate = LoopbackSubstrate::new();
        let a = substrate
            .create_endpoint("a", EndpointConfig::default(), &[], 8)
            .await
            .unwrap();
        let b = substrate
            .create_endpoint("b", EndpointConfig::default(), &[], 8)
            .await
            .unwrap();
        a.add_track(&MediaTrack::new(MediaKind::Audio), "s").await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_buffers_until_open() {
        let (a, b) = pair().await;
        let gate = CandidateGate::new(Arc::clone(&b), 8);

        assert_eq!(gate.deliver(host_candidate(1)).await, Delivery::Buffered);
        assert_eq!(gate.deliver(host_candidate(2)).await, Delivery::Buffered);
        assert_eq!(gate.pending().await, 2);

        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();

        assert_eq!(gate.open().await, 2);
        assert_eq!(gate.pending().await, 0);
        assert_eq!(gate.deliver(host_candidate(3)).await, Delivery::Applied);

        let stats = gate.stats();
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.applied, 3);
        assert_eq!(stats.rejected, 0);
    }

    #[tokio::test]
    async fn test_closed_gate_discards() {
        let (_a, b) = pair().await;
        let gate = CandidateGate::new(b, 8);
        gate.deliver(host_candidate(1)).await;

        assert_eq!(gate.close().await, 1);
        assert_eq!(gate.deliver(host_candidate(2)).await, Delivery::Discarded);
        assert_eq!(gate.open().await, 0);
        assert_eq!(gate.stats().discarded, 2);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let (_a, b) = pair().await;
        let gate = CandidateGate::new(b, 2);
        for port in 1..=3 {
            gate.deliver(host_candidate(port)).await;
        }
        assert_eq!(gate.pending().await, 2);
        assert_eq!(gate.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_rejected_candidate_counted() {
        let (a, b) = pair().await;
        let gate = CandidateGate::new(Arc::clone(&b), 8);
        b.set_remote_description(a.create_offer().await.unwrap())
            .await
            .unwrap();
        gate.open().await;

        let bad = RTCIceCandidateInit {
            candidate: "bogus".to_string(),
            ..Default::default()
        };
        assert_eq!(gate.deliver(bad).await, Delivery::Rejected);
        assert_eq!(gate.stats().rejected, 1);
    }
}
