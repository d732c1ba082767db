pub mod hbfd;
pub mod thetafd;

pub use hbfd::*;
pub use thetafd::*;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::broadcast::{Peers, ProcessId};
use crate::network::{Envelope, Tag, Transport};

/// What the broadcast engine needs to know about liveness.
///
/// Production code answers from [`Detectors`]; tests substitute fixed sets.
pub trait FailureDetector: Send + Sync {
    /// Peers currently believed alive, never including self.
    fn trusted(&self) -> BTreeSet<ProcessId>;

    /// Snapshot of the heartbeat counters.
    fn heartbeat_vector(&self) -> BTreeMap<ProcessId, u64>;
}

/// The two detectors a process runs.
#[derive(Debug)]
pub struct Detectors {
    pub hbfd: HeartbeatDetector,
    pub thetafd: ThetaDetector,
}

impl Detectors {
    pub fn new(id: ProcessId, peers: &Peers, theta_threshold: u64) -> Self {
        Detectors {
            hbfd: HeartbeatDetector::new(id, peers),
            thetafd: ThetaDetector::new(id, peers, theta_threshold),
        }
    }
}

impl FailureDetector for Detectors {
    fn trusted(&self) -> BTreeSet<ProcessId> {
        self.thetafd.trusted()
    }

    fn heartbeat_vector(&self) -> BTreeMap<ProcessId, u64> {
        self.hbfd.heartbeat_vector()
    }
}

/// Send a `tag` heartbeat to every other member each `interval`, forever.
pub async fn emit_heartbeats(
    id: ProcessId,
    peers: Peers,
    tag: Tag,
    transport: Arc<dyn Transport>,
    interval: Duration,
) {
    debug!(process = id, tag = tag.as_str(), "Heartbeat loop starting");
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for k in peers.others(id) {
            transport.send(k, Envelope::heartbeat(tag, id));
        }
    }
}
