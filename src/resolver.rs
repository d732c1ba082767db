//! Routes inbound envelopes to the component that owns their tag, and gives
//! the outside world one handle on the process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{error, warn};

use crate::broadcast::{EngineSnapshot, ProcessId, Seq, UrbMessage, UrbProcessor};
use crate::common::error::DispatchError;
use crate::common::metrics::{Metrics, ERROR_DISPATCH, ERROR_UNPACK};
use crate::detector::{Detectors, FailureDetector};
use crate::network::{Envelope, WireMessage};

pub struct Resolver {
    id: ProcessId,
    processor: Arc<UrbProcessor>,
    detectors: Arc<Detectors>,
    metrics: Arc<Metrics>,
}

impl Resolver {
    pub fn new(
        id: ProcessId,
        processor: Arc<UrbProcessor>,
        detectors: Arc<Detectors>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Resolver {
            id,
            processor,
            detectors,
            metrics,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), DispatchError> {
        let sender = envelope.sender;
        match WireMessage::open(&envelope)? {
            WireMessage::AppMsg(message) => self.processor.on_app_message(sender, message).await,
            WireMessage::AppAck(ack) => self.processor.on_ack(sender, ack).await,
            WireMessage::Gossip(gossip) => self.processor.on_gossip(sender, gossip).await,
            WireMessage::HbHeartbeat => self.detectors.hbfd.on_heartbeat(sender),
            WireMessage::ThetaHeartbeat => self.detectors.thetafd.on_heartbeat(sender),
        }
        Ok(())
    }

    /// [`Resolver::dispatch`], with failures logged and counted instead of returned.
    pub async fn handle(&self, envelope: Envelope) {
        match self.dispatch(envelope).await {
            Ok(()) => {}
            Err(e @ DispatchError::UnknownTag { .. }) => {
                self.metrics.record_error(ERROR_DISPATCH);
                error!(process = self.id, error = %e, "Dropping envelope");
            }
            Err(e @ DispatchError::Payload(_)) => {
                self.metrics.record_error(ERROR_UNPACK);
                warn!(process = self.id, error = %e, "Dropping envelope");
            }
        }
    }

    pub async fn broadcast(&self, message: UrbMessage) -> Seq {
        self.processor.broadcast(message).await
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.processor.snapshot().await
    }
}

impl FailureDetector for Resolver {
    fn trusted(&self) -> BTreeSet<ProcessId> {
        self.detectors.trusted()
    }

    fn heartbeat_vector(&self) -> BTreeMap<ProcessId, u64> {
        self.detectors.heartbeat_vector()
    }
}
