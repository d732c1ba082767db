use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use super::{Tag, Transport};
use crate::broadcast::{Delivery, Peers, ProcessId, UrbEngine, UrbProcessor};
use crate::common::config::ProtocolConfig;
use crate::common::metrics::Metrics;
use crate::detector::{emit_heartbeats, Detectors};
use crate::resolver::Resolver;

/// One process: its detectors, its broadcast processor and the resolver
/// that feeds them, all sharing one transport.
pub struct Node {
    pub id: ProcessId,
    pub peers: Peers,
    pub config: ProtocolConfig,
    pub detectors: Arc<Detectors>,
    pub processor: Arc<UrbProcessor>,
    pub resolver: Arc<Resolver>,
    transport: Arc<dyn Transport>,
}

impl Node {
    pub fn new(
        id: ProcessId,
        peers: Peers,
        config: ProtocolConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<Metrics>,
    ) -> (Self, UnboundedReceiver<Delivery>) {
        let detectors = Arc::new(Detectors::new(id, &peers, config.theta_threshold));
        let (processor, deliveries) = UrbProcessor::new(
            UrbEngine::new(id, peers.clone(), config.window),
            config.admission_poll(),
            detectors.clone(),
            Arc::clone(&transport),
            Arc::clone(&metrics),
        );
        let processor = Arc::new(processor);
        let resolver = Arc::new(Resolver::new(id, processor.clone(), detectors.clone(), metrics));

        let node = Node {
            id,
            peers,
            config,
            detectors,
            processor,
            resolver,
            transport,
        };
        (node, deliveries)
    }

    /// Starts the round loop and both heartbeat loops. Inbound traffic is
    /// wired up separately, by whichever transport the caller chose.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let span = info_span!("node", id = self.id);
        let processor = Arc::clone(&self.processor);
        let config = self.config.clone();

        let mut tasks = vec![tokio::spawn(
            async move { processor.run(config).await }.instrument(span.clone()),
        )];
        for tag in [Tag::HbHeartbeat, Tag::ThetaHeartbeat] {
            tasks.push(tokio::spawn(
                emit_heartbeats(
                    self.id,
                    self.peers.clone(),
                    tag,
                    Arc::clone(&self.transport),
                    self.config.heartbeat_interval(),
                )
                .instrument(span.clone()),
            ));
        }
        tasks
    }
}
