pub mod envelope;
pub mod memory;
pub mod node;
pub mod udp;

pub use envelope::*;
pub use node::*;

use crate::broadcast::ProcessId;

/*
    Links are fair-lossy: a datagram may be dropped, duplicated or
    reordered, but one sent infinitely often to a live process is received
    infinitely often. The broadcast protocol never waits on a send. It keeps
    resending what a peer lacks whenever that peer's heartbeat moves, and
    rebuilds lost window state from gossip, so a transport only has to make a
    reasonable attempt and report failures through logs and metrics.
*/

/// Fire-and-forget delivery of envelopes to other members.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, to: ProcessId, envelope: Envelope);
}
