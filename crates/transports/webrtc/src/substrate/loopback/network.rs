//! In-process "network" connecting loopback endpoints
//!
//! Endpoints register under their ICE username fragment. A sender looks its
//! peer up by the fragment found in the remote description, so two endpoints
//! only exchange media once each holds the other's description.

use super::endpoint::EndpointShared;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};

/// First port handed out to host candidates
const FIRST_PORT: u16 = 50_000;

/// Registry of live loopback endpoints
pub struct LoopbackNetwork {
    endpoints: RwLock<HashMap<String, Weak<EndpointShared>>>,
    next_port: AtomicU16,
}

impl LoopbackNetwork {
    /// Create an empty network
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            next_port: AtomicU16::new(FIRST_PORT),
        })
    }

    pub(super) fn register(&self, ufrag: &str, endpoint: &Arc<EndpointShared>) {
        self.endpoints
            .write()
            .insert(ufrag.to_string(), Arc::downgrade(endpoint));
    }

    pub(super) fn unregister(&self, ufrag: &str) {
        self.endpoints.write().remove(ufrag);
    }

    pub(super) fn lookup(&self, ufrag: &str) -> Option<Arc<EndpointShared>> {
        self.endpoints.read().get(ufrag).and_then(Weak::upgrade)
    }

    pub(super) fn allocate_port(&self) -> u16 {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        if port == u16::MAX {
            self.next_port.store(FIRST_PORT, Ordering::Relaxed);
        }
        port
    }

    /// Number of registered endpoints that are still alive
    pub fn endpoint_count(&self) -> usize {
        self.endpoints
            .read()
            .values()
            .filter(|e| e.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("endpoints", &self.endpoint_count())
            .finish()
    }
}
