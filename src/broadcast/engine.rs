use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use super::message::{AppMessage, Gossip, Identifier, ProcessId, Seq, UrbMessage};
use super::peers::Peers;
use super::store::{Buffer, BufferRecord};
use crate::common::digest::{short_hex, Hashable};

/*
    Every round re-validates the local state instead of trusting it:

    1. a buffer holding an empty record or two records with one identifier is
       discarded whole;
    2. the own transmit window must sit in [mS, mS + W] and buffer exactly the
       messages mS+1..seq, otherwise every tx counter is set to seq;
    3. no sender may have records more than W behind its newest one;
    4. delivered, fully acknowledged records extending the retired prefix of
       their sender are retired;
    5. retired and out-of-window records are dropped;
    6. records acknowledged by every trusted peer are delivered, and records
       a peer still lacks are resent to it once its heartbeat moved;
    7. every peer is told what we know about its window.

    mS is the lowest tx counter among trusted peers.
*/

/// State of the broadcast protocol at one process. Holds no locks and does no I/O.
#[derive(Debug, Clone)]
pub struct UrbEngine {
    pub id: ProcessId,
    pub peers: Peers,
    pub window: u64,

    /// Messages this process has broadcast.
    pub seq: Seq,
    /// Highest sequence number of sender `k` retired here.
    pub rx_obsolete: BTreeMap<ProcessId, Seq>,
    /// Highest own sequence number peer `k` is believed to have retired.
    pub tx_obsolete: BTreeMap<ProcessId, Seq>,
    pub buffer: Buffer,
    /// Identifiers delivered here and not yet retired. Survives a buffer
    /// flush so a rebuilt record is not delivered a second time.
    pub delivered: BTreeSet<Identifier>,
}

/// A record that reached quorum during a round.
#[derive(Debug, Clone)]
pub struct DeliveredRecord {
    pub identifier: Identifier,
    pub message: UrbMessage,
    pub broadcast_at: Option<Instant>,
}

/// Everything a round wants done outside the exclusive section.
#[derive(Debug, Default)]
pub struct RoundOutput {
    pub flushed: bool,
    pub window_reset: bool,
    pub deliveries: Vec<DeliveredRecord>,
    pub retransmissions: Vec<(ProcessId, AppMessage)>,
    pub gossip: Vec<(ProcessId, Gossip)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordSnapshot {
    pub sender: ProcessId,
    pub seq: Seq,
    pub delivered: bool,
    pub ack_set: Vec<ProcessId>,
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub id: ProcessId,
    pub seq: Seq,
    pub window: u64,
    pub rx_obsolete: BTreeMap<ProcessId, Seq>,
    pub tx_obsolete: BTreeMap<ProcessId, Seq>,
    pub buffer: Vec<RecordSnapshot>,
}

impl UrbEngine {
    pub fn new(id: ProcessId, peers: Peers, window: u64) -> Self {
        let counters: BTreeMap<ProcessId, Seq> = peers.iter().map(|k| (k, 0)).collect();
        UrbEngine {
            id,
            peers,
            window,
            seq: 0,
            rx_obsolete: counters.clone(),
            tx_obsolete: counters,
            buffer: Buffer::new(),
            delivered: BTreeSet::new(),
        }
    }

    fn rx(&self, k: ProcessId) -> Seq {
        self.rx_obsolete.get(&k).copied().unwrap_or(0)
    }

    fn tx(&self, k: ProcessId) -> Seq {
        self.tx_obsolete.get(&k).copied().unwrap_or(0)
    }

    /// Lowest tx counter among trusted peers. With nobody trusted the process
    /// only waits for its own retirement of its own messages.
    pub fn min_tx_obsolete(&self, trusted: &BTreeSet<ProcessId>) -> Seq {
        trusted
            .iter()
            .filter(|&&k| k != self.id)
            .filter_map(|k| self.tx_obsolete.get(k).copied())
            .min()
            .unwrap_or_else(|| self.tx(self.id).max(self.rx(self.id)))
    }

    /// Flow-control admission check.
    pub fn can_admit(&self, trusted: &BTreeSet<ProcessId>) -> bool {
        self.seq < self.min_tx_obsolete(trusted).saturating_add(self.window)
    }

    /// Takes the next own sequence number for `message` if the window allows it.
    pub fn try_admit(&mut self, trusted: &BTreeSet<ProcessId>, message: &UrbMessage) -> Option<Seq> {
        if !self.can_admit(trusted) {
            return None;
        }

        self.seq += 1;
        let seq = self.seq;
        self.update(Some(message.clone()), self.id, seq, self.id);
        if let Some(record) = self.buffer.get_mut(&Identifier::new(self.id, seq)) {
            record.broadcast_at = Some(Instant::now());
        }
        Some(seq)
    }

    /// Create-or-merge for `(originator, seq)` seen through `relay`.
    ///
    /// Without a payload this only grows the ack set of an existing record.
    pub fn update(&mut self, message: Option<UrbMessage>, originator: ProcessId, seq: Seq, relay: ProcessId) {
        if seq <= self.rx(originator) {
            return;
        }

        let identifier = Identifier::new(originator, seq);
        if let Some(record) = self.buffer.get_mut(&identifier) {
            record.ack_set.insert(originator);
            record.ack_set.insert(relay);
            return;
        }

        if let Some(message) = message {
            let mut record = BufferRecord::new(message, identifier, BTreeSet::from([originator, relay]));
            record.delivered = self.delivered.contains(&identifier);
            self.buffer.add(record);
        }
    }

    /// Pointwise maximum with what peer `from` reports. Returns false for
    /// gossip that cannot come from a peer.
    pub fn on_gossip(&mut self, from: ProcessId, gossip: Gossip) -> bool {
        if from == self.id || !self.peers.is_member(from) {
            return false;
        }

        self.seq = self.seq.max(gossip.seq_estimate);
        let tx = self.tx_obsolete.entry(from).or_insert(0);
        *tx = (*tx).max(gossip.tx_estimate);
        let rx = self.rx_obsolete.entry(from).or_insert(0);
        *rx = (*rx).max(gossip.rx_estimate);
        true
    }

    pub fn run_round(
        &mut self,
        trusted: &BTreeSet<ProcessId>,
        heartbeats: &BTreeMap<ProcessId, u64>,
    ) -> RoundOutput {
        let flushed = self.flush_if_corrupted();
        let window_reset = self.check_transmit_window(trusted);
        self.check_receive_window();
        self.advance_obsolete(trusted);
        self.trim(trusted);
        let (deliveries, retransmissions) = self.process_records(trusted, heartbeats);
        let gossip = self.gossip();

        RoundOutput {
            flushed,
            window_reset,
            deliveries,
            retransmissions,
            gossip,
        }
    }

    fn flush_if_corrupted(&mut self) -> bool {
        if !self.buffer.is_corrupted() {
            return false;
        }

        warn!(process = self.id, records = self.buffer.len(), "Corrupted buffer, flushing");
        self.buffer.clear();
        true
    }

    fn check_transmit_window(&mut self, trusted: &BTreeSet<ProcessId>) -> bool {
        let min_tx = self.min_tx_obsolete(trusted);
        let in_window = min_tx <= self.seq && self.seq <= min_tx.saturating_add(self.window);

        // Own records at or below min_tx are retired and wait for the trim.
        let consistent = in_window && {
            let outstanding: BTreeSet<Seq> = self
                .buffer
                .seqs_of(self.id)
                .into_iter()
                .filter(|&s| s > min_tx)
                .collect();
            // Distinct values above min_tx, as many as min_tx+1..=seq and none past seq.
            outstanding.len() as u64 == self.seq - min_tx
                && outstanding.last().map_or(true, |&newest| newest <= self.seq)
        };
        if consistent {
            return false;
        }

        warn!(process = self.id, seq = self.seq, min_tx, "Transmit window out of sync, resetting");
        let seq = self.seq;
        for tx in self.tx_obsolete.values_mut() {
            *tx = seq;
        }
        true
    }

    fn check_receive_window(&mut self) {
        for k in self.peers.iter() {
            let floor = self.buffer.max_seq(k).saturating_sub(self.window);
            let rx = self.rx_obsolete.entry(k).or_insert(0);
            *rx = (*rx).max(floor);
        }
    }

    fn advance_obsolete(&mut self, trusted: &BTreeSet<ProcessId>) {
        loop {
            let next = self
                .buffer
                .iter()
                .find(|r| {
                    r.delivered
                        && self.peers.is_member(r.identifier.sender)
                        && self.rx(r.identifier.sender).checked_add(1) == Some(r.identifier.seq)
                        && r.acked_by_all(trusted)
                })
                .map(|r| r.identifier.sender);

            match next.and_then(|sender| self.rx_obsolete.get_mut(&sender)) {
                Some(rx) => *rx += 1,
                None => break,
            }
        }
    }

    fn trim(&mut self, trusted: &BTreeSet<ProcessId>) {
        let min_tx = self.min_tx_obsolete(trusted);
        let max_seqs: BTreeMap<ProcessId, Seq> =
            self.peers.iter().map(|k| (k, self.buffer.max_seq(k))).collect();
        let id = self.id;
        let window = self.window;
        let peers = &self.peers;
        let rx = &self.rx_obsolete;

        self.buffer.retain(|r| {
            let Identifier { sender, seq } = r.identifier;
            if sender == id {
                return seq > min_tx;
            }
            match (peers.is_member(sender), rx.get(&sender), max_seqs.get(&sender)) {
                (true, Some(&retired), Some(&max)) => seq > retired && seq.saturating_add(window) >= max,
                _ => false,
            }
        });

        // A legitimate delivered identifier lies in (rx, rx + W].
        self.delivered.retain(|i| match rx.get(&i.sender) {
            Some(&retired) => i.seq > retired && i.seq <= retired.saturating_add(window),
            None => false,
        });
    }

    fn process_records(
        &mut self,
        trusted: &BTreeSet<ProcessId>,
        heartbeats: &BTreeMap<ProcessId, u64>,
    ) -> (Vec<DeliveredRecord>, Vec<(ProcessId, AppMessage)>) {
        let mut deliveries = Vec::new();
        let mut retransmissions = Vec::new();
        let id = self.id;

        for record in self.buffer.iter_mut() {
            let Some(message) = record.message.clone() else {
                continue;
            };
            let Identifier { sender, seq } = record.identifier;

            if !record.delivered && record.acked_by_all(trusted) {
                record.delivered = true;
                self.delivered.insert(record.identifier);
                deliveries.push(DeliveredRecord {
                    identifier: record.identifier,
                    message: message.clone(),
                    broadcast_at: record.broadcast_at,
                });
            }

            for k in self.peers.others(id) {
                let unacked = !record.ack_set.contains(&k);
                let unretired = sender == id && self.tx_obsolete.get(&k).copied().unwrap_or(0) < seq;
                let heartbeat = heartbeats.get(&k).copied().unwrap_or(0);
                if (unacked || unretired) && record.heartbeat_advanced(k, heartbeat) {
                    record.last_heartbeat.insert(k, heartbeat);
                    retransmissions.push((
                        k,
                        AppMessage {
                            originator: sender,
                            seq,
                            message: message.clone(),
                        },
                    ));
                }
            }
        }

        (deliveries, retransmissions)
    }

    fn gossip(&self) -> Vec<(ProcessId, Gossip)> {
        self.peers
            .others(self.id)
            .map(|k| {
                (
                    k,
                    Gossip {
                        seq_estimate: self.buffer.max_seq(k),
                        rx_estimate: self.tx(k),
                        tx_estimate: self.rx(k),
                    },
                )
            })
            .collect()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let buffer = self
            .buffer
            .iter()
            .map(|r| RecordSnapshot {
                sender: r.identifier.sender,
                seq: r.identifier.seq,
                delivered: r.delivered,
                ack_set: r.ack_set.iter().copied().collect(),
                digest: r.message.as_ref().map(|m| short_hex(&m.hash())),
            })
            .collect();

        debug!(process = self.id, seq = self.seq, "Taking engine snapshot");
        EngineSnapshot {
            id: self.id,
            seq: self.seq,
            window: self.window,
            rx_obsolete: self.rx_obsolete.clone(),
            tx_obsolete: self.tx_obsolete.clone(),
            buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(id: ProcessId, members: Vec<ProcessId>, window: u64) -> UrbEngine {
        UrbEngine::new(id, Peers::new(members), window)
    }

    fn record(sender: ProcessId, seq: Seq, acks: &[ProcessId]) -> BufferRecord {
        BufferRecord::new(
            UrbMessage::new(format!("Message {}_{}", sender, seq)),
            Identifier::new(sender, seq),
            acks.iter().copied().collect(),
        )
    }

    fn set(ids: &[ProcessId]) -> BTreeSet<ProcessId> {
        ids.iter().copied().collect()
    }

    fn heartbeats(values: &[(ProcessId, u64)]) -> BTreeMap<ProcessId, u64> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_min_tx_obsolete() {
        let mut engine = engine(0, vec![0, 1, 2, 3, 4, 5], 10);
        engine.tx_obsolete = [(0, 1), (1, 2), (2, 5), (3, 10), (4, 0), (5, 50)].into_iter().collect();

        assert_eq!(engine.min_tx_obsolete(&set(&[1, 3, 5])), 2);
    }

    #[test]
    fn test_min_tx_obsolete_without_trusted_peers() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        engine.tx_obsolete.insert(0, 3);
        engine.rx_obsolete.insert(0, 7);

        assert_eq!(engine.min_tx_obsolete(&set(&[])), 7);
        assert_eq!(engine.min_tx_obsolete(&set(&[0])), 7);
    }

    #[test]
    fn test_update() {
        let mut engine = engine(0, vec![0, 1, 2, 3, 4, 5], 10);
        engine.buffer.add(record(1, 1, &[0, 1]));
        engine.buffer.add(record(2, 1, &[0, 2]));
        engine.buffer.add(record(2, 2, &[0, 2]));

        // An ack alone never creates a record.
        engine.update(None, 3, 1, 3);
        assert_eq!(engine.buffer.len(), 3);

        engine.update(Some(UrbMessage::new("foo")), 3, 1, 4);
        assert_eq!(engine.buffer.len(), 4);
        assert_eq!(engine.buffer.get(&Identifier::new(3, 1)).unwrap().ack_set, set(&[3, 4]));

        // A known identifier only grows its ack set.
        engine.update(Some(UrbMessage::new("foo")), 1, 1, 5);
        assert_eq!(engine.buffer.len(), 4);
        assert_eq!(engine.buffer.get(&Identifier::new(1, 1)).unwrap().ack_set, set(&[0, 1, 5]));
    }

    #[test]
    fn test_update_ignores_retired_messages() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        engine.rx_obsolete.insert(1, 4);

        engine.update(Some(UrbMessage::new("old")), 1, 4, 1);
        assert!(engine.buffer.is_empty());

        engine.update(Some(UrbMessage::new("new")), 1, 5, 1);
        assert_eq!(engine.buffer.len(), 1);
    }

    #[test]
    fn test_admission_stops_at_window() {
        let mut engine = engine(0, vec![0, 1, 2], 3);
        let trusted = set(&[1, 2]);
        let message = UrbMessage::new("hello");

        assert_eq!(engine.try_admit(&trusted, &message), Some(1));
        assert_eq!(engine.try_admit(&trusted, &message), Some(2));
        assert_eq!(engine.try_admit(&trusted, &message), Some(3));
        assert_eq!(engine.try_admit(&trusted, &message), None);
        assert_eq!(engine.seq, 3);

        let own = engine.buffer.get(&Identifier::new(0, 1)).unwrap();
        assert_eq!(own.ack_set, set(&[0]));
        assert!(own.broadcast_at.is_some());

        // Peer 2 retiring seq 1 frees one slot.
        engine.tx_obsolete.insert(1, 1);
        engine.tx_obsolete.insert(2, 1);
        assert_eq!(engine.try_admit(&trusted, &message), Some(4));
    }

    #[test]
    fn test_obsolete_prefix_advances() {
        let mut engine = engine(0, vec![0, 1, 2, 3, 4, 5], 10);
        engine.rx_obsolete.insert(1, 1);
        let trusted = set(&[0, 1, 2]);

        let mut r = record(1, 2, &[0, 1, 2, 3]);
        r.delivered = true;
        engine.buffer.add(r.clone());
        engine.advance_obsolete(&trusted);
        assert_eq!(engine.rx(1), 2);

        // Not delivered, missing an ack, or not next in line: no advance.
        let mut engine = self::engine(0, vec![0, 1, 2, 3, 4, 5], 10);
        engine.rx_obsolete.insert(1, 1);
        let mut undelivered = r.clone();
        undelivered.delivered = false;
        engine.buffer.add(undelivered);
        let mut partial = record(1, 3, &[0, 1]);
        partial.delivered = true;
        engine.buffer.add(partial);
        let mut gap = record(1, 5, &[0, 1, 2]);
        gap.delivered = true;
        engine.buffer.add(gap);
        engine.advance_obsolete(&trusted);
        assert_eq!(engine.rx(1), 1);
    }

    #[test]
    fn test_obsolete_advance_is_greedy() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        for seq in [3, 1, 2] {
            let mut r = record(1, seq, &[0, 1, 2]);
            r.delivered = true;
            engine.buffer.add(r);
        }

        engine.advance_obsolete(&set(&[1, 2]));
        assert_eq!(engine.rx(1), 3);
    }

    #[test]
    fn test_round_flushes_duplicate_identifiers() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        engine.buffer.add(record(2, 5, &[2]));
        engine.buffer.add(record(2, 5, &[0, 2]));
        engine.buffer.add(record(1, 1, &[1]));

        let output = engine.run_round(&set(&[1, 2]), &heartbeats(&[(1, 1), (2, 1)]));

        assert!(output.flushed);
        assert!(engine.buffer.is_empty());
        assert!(output.deliveries.is_empty());
    }

    #[test]
    fn test_round_repairs_adversarial_buffer() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        let mut empty = record(1, 2, &[1]);
        empty.message = None;
        engine.buffer.add(empty);
        engine.buffer.add(record(1, 3, &[1]));
        engine.buffer.add(record(1, 3, &[1, 2]));
        engine.buffer.add(record(0, 9, &[0]));

        engine.run_round(&set(&[1, 2]), &heartbeats(&[]));

        assert!(!engine.buffer.is_corrupted());
        assert!(engine.buffer.iter().all(|r| r.message.is_some()));
    }

    #[test]
    fn test_window_reset_restores_flow_control_bound() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        engine.seq = 50;
        let trusted = set(&[1, 2]);

        let output = engine.run_round(&trusted, &heartbeats(&[]));

        assert!(output.window_reset);
        for k in trusted {
            assert!(engine.seq - engine.tx(k) <= engine.window);
        }
        assert_eq!(engine.tx(0), 50);
    }

    #[test]
    fn test_window_reset_when_own_record_missing() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        let trusted = set(&[1, 2]);
        engine.try_admit(&trusted, &UrbMessage::new("a")).unwrap();
        engine.try_admit(&trusted, &UrbMessage::new("b")).unwrap();
        engine.buffer.retain(|r| r.identifier.seq != 1);

        let output = engine.run_round(&trusted, &heartbeats(&[]));

        assert!(output.window_reset);
        assert_eq!(engine.tx(1), 2);
        assert_eq!(engine.tx(2), 2);
    }

    #[test]
    fn test_retired_own_records_do_not_reset_window() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        let trusted = set(&[1, 2]);
        engine.try_admit(&trusted, &UrbMessage::new("a")).unwrap();
        engine.try_admit(&trusted, &UrbMessage::new("b")).unwrap();
        engine.tx_obsolete.insert(1, 1);
        engine.tx_obsolete.insert(2, 1);

        let output = engine.run_round(&trusted, &heartbeats(&[]));

        assert!(!output.window_reset);
        assert!(engine.buffer.get(&Identifier::new(0, 1)).is_none());
        assert!(engine.buffer.get(&Identifier::new(0, 2)).is_some());
    }

    #[test]
    fn test_receive_window_bounds_lagging_records() {
        let mut engine = engine(0, vec![0, 1, 2], 3);
        for seq in [1, 2, 6] {
            engine.buffer.add(record(1, seq, &[1]));
        }

        engine.run_round(&set(&[1, 2]), &heartbeats(&[]));

        assert_eq!(engine.rx(1), 3);
        assert_eq!(engine.buffer.seqs_of(1), BTreeSet::from([6]));
    }

    #[test]
    fn test_trim_drops_non_members() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        engine.buffer.add(record(7, 1, &[7]));
        engine.buffer.add(record(1, 1, &[1]));

        engine.run_round(&set(&[1, 2]), &heartbeats(&[]));

        assert!(engine.buffer.get(&Identifier::new(7, 1)).is_none());
        assert!(engine.buffer.get(&Identifier::new(1, 1)).is_some());
    }

    #[test]
    fn test_delivers_once_all_trusted_acked() {
        let mut engine = engine(1, vec![0, 1, 2], 10);
        let trusted = set(&[0, 2]);
        engine.update(Some(UrbMessage::new("hi")), 0, 1, 0);

        let output = engine.run_round(&trusted, &heartbeats(&[(0, 1), (2, 1)]));
        assert!(output.deliveries.is_empty());

        engine.update(None, 0, 1, 2);
        let output = engine.run_round(&trusted, &heartbeats(&[(0, 1), (2, 1)]));
        assert_eq!(output.deliveries.len(), 1);
        assert_eq!(output.deliveries[0].identifier, Identifier::new(0, 1));
        assert_eq!(output.deliveries[0].message, UrbMessage::new("hi"));

        let output = engine.run_round(&trusted, &heartbeats(&[(0, 1), (2, 1)]));
        assert!(output.deliveries.is_empty());
    }

    #[test]
    fn test_rebuilt_record_is_not_delivered_again() {
        let mut engine = engine(1, vec![0, 1, 2], 10);
        let trusted = set(&[0, 2]);
        engine.update(Some(UrbMessage::new("hi")), 0, 1, 2);
        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert_eq!(output.deliveries.len(), 1);

        // Corrupt the buffer so the next round flushes it, then rebuild from a retransmission.
        let mut empty = record(2, 1, &[2]);
        empty.message = None;
        engine.buffer.add(empty);
        engine.rx_obsolete.insert(0, 0);
        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert!(output.flushed);

        engine.update(Some(UrbMessage::new("hi")), 0, 1, 0);
        engine.update(None, 0, 1, 2);
        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert!(output.deliveries.is_empty());
    }

    #[test]
    fn test_retransmits_only_after_heartbeat_moves() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        let trusted = set(&[1, 2]);
        engine.try_admit(&trusted, &UrbMessage::new("hi")).unwrap();

        let output = engine.run_round(&trusted, &heartbeats(&[(1, 3), (2, 3)]));
        let targets: Vec<ProcessId> = output.retransmissions.iter().map(|(k, _)| *k).collect();
        assert_eq!(targets, vec![1, 2]);

        let output = engine.run_round(&trusted, &heartbeats(&[(1, 3), (2, 3)]));
        assert!(output.retransmissions.is_empty());

        // Peer 2 acked, peer 1 showed a new heartbeat.
        engine.update(None, 0, 1, 2);
        let output = engine.run_round(&trusted, &heartbeats(&[(1, 4), (2, 4)]));
        let targets: Vec<ProcessId> = output.retransmissions.iter().map(|(k, _)| *k).collect();
        assert_eq!(targets, vec![1, 2]);

        // Once acked and retired everywhere nothing is resent.
        engine.update(None, 0, 1, 1);
        engine.tx_obsolete.insert(1, 1);
        engine.tx_obsolete.insert(2, 1);
        let output = engine.run_round(&trusted, &heartbeats(&[(1, 9), (2, 9)]));
        assert!(output.retransmissions.is_empty());
    }

    #[test]
    fn test_gossip_raises_seq() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        engine.seq = 10;

        engine.on_gossip(1, Gossip { seq_estimate: 50, rx_estimate: 0, tx_estimate: 0 });

        assert_eq!(engine.seq, 50);
    }

    #[test]
    fn test_rounds_survive_maximal_seq_estimate() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        let trusted = set(&[1, 2]);
        engine.on_gossip(1, Gossip { seq_estimate: u64::MAX, rx_estimate: 0, tx_estimate: 0 });

        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert!(output.window_reset);
        assert_eq!(engine.tx(1), u64::MAX);

        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert!(!output.window_reset);
        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert!(!output.window_reset);
        assert!(!engine.can_admit(&trusted));
    }

    #[test]
    fn test_rounds_survive_maximal_rx_estimate() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        let trusted = set(&[1, 2]);
        engine.update(Some(UrbMessage::new("hi")), 1, 1, 2);
        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert_eq!(output.deliveries.len(), 1);

        engine.on_gossip(1, Gossip { seq_estimate: 0, rx_estimate: u64::MAX, tx_estimate: 0 });

        let output = engine.run_round(&trusted, &heartbeats(&[]));
        assert!(output.deliveries.is_empty());
        assert_eq!(engine.rx(1), u64::MAX);
        assert!(engine.buffer.get(&Identifier::new(1, 1)).is_none());
    }

    #[test]
    fn test_gossip_only_moves_forward() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        assert!(engine.on_gossip(2, Gossip { seq_estimate: 4, rx_estimate: 6, tx_estimate: 3 }));
        assert!(engine.on_gossip(2, Gossip { seq_estimate: 1, rx_estimate: 2, tx_estimate: 1 }));

        assert_eq!(engine.seq, 4);
        assert_eq!(engine.rx(2), 6);
        assert_eq!(engine.tx(2), 3);

        assert!(!engine.on_gossip(0, Gossip { seq_estimate: 99, rx_estimate: 99, tx_estimate: 99 }));
        assert!(!engine.on_gossip(9, Gossip { seq_estimate: 99, rx_estimate: 99, tx_estimate: 99 }));
        assert_eq!(engine.seq, 4);
    }

    #[test]
    fn test_gossip_reports_receiver_view() {
        let mut engine = engine(0, vec![0, 1, 2], 10);
        engine.rx_obsolete.insert(1, 4);
        engine.tx_obsolete.insert(1, 2);
        engine.buffer.add(record(1, 6, &[1]));

        let gossip = engine.gossip();

        assert_eq!(
            gossip,
            vec![
                (1, Gossip { seq_estimate: 6, rx_estimate: 2, tx_estimate: 4 }),
                (2, Gossip { seq_estimate: 0, rx_estimate: 0, tx_estimate: 0 }),
            ]
        );
    }

    #[test]
    fn test_counters_monotone_over_rounds() {
        let mut engine = engine(0, vec![0, 1, 2], 2);
        let trusted = set(&[1, 2]);
        let mut last_rx = engine.rx_obsolete.clone();

        for seq in 1..=6 {
            engine.update(Some(UrbMessage::new("x")), 1, seq, 1);
            engine.update(None, 1, seq, 2);
            engine.run_round(&trusted, &heartbeats(&[(1, seq), (2, seq)]));
            for (k, rx) in &engine.rx_obsolete {
                assert!(*rx >= last_rx[k]);
            }
            last_rx = engine.rx_obsolete.clone();
        }
        assert!(engine.rx(1) >= 4);
    }
}
