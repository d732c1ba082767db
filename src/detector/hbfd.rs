use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::broadcast::{Peers, ProcessId};

/// Heartbeat failure detector: one counter per member, bumped by every
/// heartbeat that member sends. It never suspects anyone; the broadcast
/// engine reads a moving counter as "worth resending to".
#[derive(Debug)]
pub struct HeartbeatDetector {
    id: ProcessId,
    counters: BTreeMap<ProcessId, AtomicU64>,
}

impl HeartbeatDetector {
    pub fn new(id: ProcessId, peers: &Peers) -> Self {
        let counters = peers.iter().map(|k| (k, AtomicU64::new(0))).collect();
        HeartbeatDetector { id, counters }
    }

    pub fn on_heartbeat(&self, sender: ProcessId) {
        match self.counters.get(&sender) {
            Some(counter) => {
                let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(process = self.id, sender, count, "HB heartbeat");
            }
            None => trace!(process = self.id, sender, "HB heartbeat from non-member ignored"),
        }
    }

    /// Copy of the counters; later heartbeats do not show up in it.
    pub fn heartbeat_vector(&self) -> BTreeMap<ProcessId, u64> {
        self.counters
            .iter()
            .map(|(&k, counter)| (k, counter.load(Ordering::Relaxed)))
            .collect()
    }
}
