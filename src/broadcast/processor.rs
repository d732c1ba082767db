use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, trace, warn};

use super::engine::{DeliveredRecord, EngineSnapshot, UrbEngine};
use super::message::{AppAck, AppMessage, Delivery, Gossip, ProcessId, Seq, UrbMessage};
use crate::common::config::ProtocolConfig;
use crate::common::digest::{short_hex, Hashable};
use crate::common::metrics::{Metrics, ERROR_SEND};
use crate::detector::FailureDetector;
use crate::network::{Transport, WireMessage};

/// Drives an [`UrbEngine`]: runs its rounds, applies inbound messages and
/// sends what the engine asks for.
///
/// The engine lock is never held across a send or while a broadcast waits
/// for room in the window.
pub struct UrbProcessor {
    pub id: ProcessId,
    engine: Mutex<UrbEngine>,
    window_advanced: Notify,
    admission_poll: Duration,
    detector: Arc<dyn FailureDetector>,
    transport: Arc<dyn Transport>,
    deliveries: UnboundedSender<Delivery>,
    metrics: Arc<Metrics>,
}

impl UrbProcessor {
    pub fn new(
        engine: UrbEngine,
        admission_poll: Duration,
        detector: Arc<dyn FailureDetector>,
        transport: Arc<dyn Transport>,
        metrics: Arc<Metrics>,
    ) -> (Self, UnboundedReceiver<Delivery>) {
        let (deliveries, delivery_rx) = mpsc::unbounded_channel();
        let processor = UrbProcessor {
            id: engine.id,
            engine: Mutex::new(engine),
            window_advanced: Notify::new(),
            admission_poll,
            detector,
            transport,
            deliveries,
            metrics,
        };
        (processor, delivery_rx)
    }

    /// Blocks until flow control admits `message`, then returns its sequence number.
    pub async fn broadcast(&self, message: UrbMessage) -> Seq {
        let mut waited = false;
        loop {
            // Register before checking so a wake-up between check and wait is not lost.
            let advanced = self.window_advanced.notified();
            let trusted = self.detector.trusted();
            if let Some(seq) = self.engine.lock().await.try_admit(&trusted, &message) {
                self.metrics.broadcasts.inc();
                info!(process = self.id, seq, digest = %short_hex(&message.hash()), "Broadcast admitted");
                return seq;
            }

            if !waited {
                debug!(process = self.id, "Transmit window full, waiting");
                waited = true;
            }
            let _ = tokio::time::timeout(self.admission_poll, advanced).await;
        }
    }

    /// Runs rounds forever, sleeping between them as `config` says.
    pub async fn run(&self, config: ProtocolConfig) {
        info!(process = self.id, "Broadcast rounds starting");
        loop {
            self.round().await;
            tokio::time::sleep(config.next_round_delay()).await;
        }
    }

    pub async fn round(&self) {
        let trusted = self.detector.trusted();
        let heartbeats = self.detector.heartbeat_vector();

        let (output, buffered) = {
            let mut engine = self.engine.lock().await;
            let output = engine.run_round(&trusted, &heartbeats);
            (output, engine.buffer.len())
        };
        self.window_advanced.notify_waiters();

        self.metrics.buffer_size.set(buffered as i64);
        self.metrics.trusted_peers.set(trusted.len() as i64);
        if output.flushed {
            self.metrics.buffer_flushes.inc();
        }
        if output.window_reset {
            self.metrics.window_resets.inc();
        }

        for record in output.deliveries {
            self.deliver(record);
        }
        for (k, message) in output.retransmissions {
            self.send(k, WireMessage::AppMsg(message));
        }
        for (k, gossip) in output.gossip {
            self.send(k, WireMessage::Gossip(gossip));
        }
    }

    fn deliver(&self, record: DeliveredRecord) {
        let digest = record.message.hash();
        info!(
            process = self.id,
            sender = record.identifier.sender,
            seq = record.identifier.seq,
            digest = %short_hex(&digest),
            "Delivered"
        );

        self.metrics.deliveries.inc();
        if let Some(at) = record.broadcast_at {
            self.metrics.delivery_latency.observe(at.elapsed().as_secs_f64());
        }

        let delivery = Delivery {
            identifier: record.identifier,
            message: record.message,
            digest,
        };
        if self.deliveries.send(delivery).is_err() {
            trace!(process = self.id, "Nobody is listening for deliveries");
        }
    }

    fn send(&self, to: ProcessId, message: WireMessage) {
        let tag = message.tag();
        match message.into_envelope(self.id) {
            Ok(envelope) => self.transport.send(to, envelope),
            Err(e) => {
                self.metrics.record_error(ERROR_SEND);
                warn!(process = self.id, to, tag = tag.as_str(), error = %e, "Could not build envelope");
            }
        }
    }

    /// Buffers a copy forwarded by `from` and acknowledges it.
    pub async fn on_app_message(&self, from: ProcessId, message: AppMessage) {
        let AppMessage { originator, seq, message } = message;
        trace!(process = self.id, from, originator, seq, "APP_MSG");
        self.engine.lock().await.update(Some(message), originator, seq, from);
        self.send(from, WireMessage::AppAck(AppAck { originator, seq }));
    }

    pub async fn on_ack(&self, from: ProcessId, ack: AppAck) {
        trace!(process = self.id, from, originator = ack.originator, seq = ack.seq, "APP_ACK");
        self.engine.lock().await.update(None, ack.originator, ack.seq, from);
    }

    pub async fn on_gossip(&self, from: ProcessId, gossip: Gossip) {
        let accepted = self.engine.lock().await.on_gossip(from, gossip);
        if accepted {
            self.window_advanced.notify_waiters();
        } else {
            debug!(process = self.id, from, "Ignoring gossip from non-peer");
        }
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.engine.lock().await.snapshot()
    }
}
