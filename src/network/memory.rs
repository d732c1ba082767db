//! In-process network for running several processes inside one runtime.
//!
//! Every envelope goes through the same JSON codec as on UDP, so a message
//! that would not survive the wire does not survive here either.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

use super::envelope::{decode, encode, Envelope};
use super::Transport;
use crate::broadcast::ProcessId;
use crate::resolver::Resolver;

#[derive(Debug, Default)]
pub struct MemoryNetwork {
    inboxes: Mutex<HashMap<ProcessId, UnboundedSender<Envelope>>>,
    isolated: Mutex<HashSet<ProcessId>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryNetwork::default())
    }

    /// Creates the inbox of process `id`, replacing any earlier one.
    pub fn register(&self, id: ProcessId) -> UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().insert(id, tx);
        rx
    }

    pub fn endpoint(self: &Arc<Self>, id: ProcessId) -> MemoryTransport {
        MemoryTransport {
            id,
            network: Arc::clone(self),
        }
    }

    /// Drop all traffic to and from `id` until [`MemoryNetwork::heal`].
    pub fn isolate(&self, id: ProcessId) {
        self.isolated.lock().insert(id);
    }

    pub fn heal(&self, id: ProcessId) {
        self.isolated.lock().remove(&id);
    }

    fn deliver(&self, from: ProcessId, to: ProcessId, envelope: Envelope) {
        {
            let isolated = self.isolated.lock();
            if isolated.contains(&from) || isolated.contains(&to) {
                trace!(from, to, "Dropping envelope across partition");
                return;
            }
        }

        let envelope = match encode(&envelope).and_then(|bytes| decode(&bytes)) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(from, to, error = %e, "Envelope does not survive the codec");
                return;
            }
        };

        match self.inboxes.lock().get(&to) {
            Some(inbox) => {
                if inbox.send(envelope).is_err() {
                    trace!(from, to, "Inbox closed");
                }
            }
            None => trace!(from, to, "No inbox registered"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    id: ProcessId,
    network: Arc<MemoryNetwork>,
}

impl Transport for MemoryTransport {
    fn send(&self, to: ProcessId, envelope: Envelope) {
        self.network.deliver(self.id, to, envelope);
    }
}

/// Hands each envelope from `inbox` to the resolver in its own task.
pub async fn receive_loop(mut inbox: UnboundedReceiver<Envelope>, resolver: Arc<Resolver>) {
    while let Some(envelope) = inbox.recv().await {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.handle(envelope).await });
    }
}
