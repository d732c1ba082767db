use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::broadcast::{Peers, ProcessId};

/// Theta failure detector.
///
/// Counts, for each peer, how many heartbeats arrived from *other* peers
/// since it was last heard from. A peer is trusted while its count stays
/// below `threshold`; a larger threshold suspects less often and notices
/// real crashes later.
#[derive(Debug)]
pub struct ThetaDetector {
    id: ProcessId,
    threshold: u64,
    vector: BTreeMap<ProcessId, AtomicU64>,
}

impl ThetaDetector {
    pub fn new(id: ProcessId, peers: &Peers, threshold: u64) -> Self {
        let vector = peers.iter().map(|k| (k, AtomicU64::new(0))).collect();
        ThetaDetector { id, threshold, vector }
    }

    pub fn on_heartbeat(&self, sender: ProcessId) {
        if !self.vector.contains_key(&sender) {
            trace!(process = self.id, sender, "Theta heartbeat from non-member ignored");
            return;
        }

        for (&k, count) in &self.vector {
            if k == sender || k == self.id {
                count.store(0, Ordering::Relaxed);
            } else {
                let previous = count.fetch_add(1, Ordering::Relaxed);
                if previous + 1 == self.threshold {
                    debug!(process = self.id, peer = k, "Peer no longer trusted");
                }
            }
        }
    }

    /// Peers other than self whose count is below the threshold.
    pub fn trusted(&self) -> BTreeSet<ProcessId> {
        self.vector
            .iter()
            .filter(|(&k, count)| k != self.id && count.load(Ordering::Relaxed) < self.threshold)
            .map(|(&k, _)| k)
            .collect()
    }

    pub fn vector(&self) -> BTreeMap<ProcessId, u64> {
        self.vector
            .iter()
            .map(|(&k, count)| (k, count.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_resets_sender_and_ages_others() {
        let detector = ThetaDetector::new(0, &Peers::new(vec![0, 1, 2, 3]), 10);

        detector.on_heartbeat(1);
        detector.on_heartbeat(1);
        detector.on_heartbeat(2);

        assert_eq!(detector.vector(), BTreeMap::from([(0, 0), (1, 1), (2, 0), (3, 3)]));
    }

    #[test]
    fn test_trusted_excludes_self_and_silent_peers() {
        let detector = ThetaDetector::new(0, &Peers::new(vec![0, 1, 2]), 3);
        assert_eq!(detector.trusted(), BTreeSet::from([1, 2]));

        for _ in 0..3 {
            detector.on_heartbeat(2);
        }
        assert_eq!(detector.trusted(), BTreeSet::from([2]));

        detector.on_heartbeat(1);
        assert_eq!(detector.trusted(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_non_member_heartbeat_changes_nothing() {
        let detector = ThetaDetector::new(0, &Peers::new(vec![0, 1]), 3);
        detector.on_heartbeat(5);

        assert_eq!(detector.vector(), BTreeMap::from([(0, 0), (1, 0)]));
    }
}
