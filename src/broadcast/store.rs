use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use super::message::{Identifier, ProcessId, Seq, UrbMessage};

/// One in-flight or recently delivered message.
#[derive(Clone, Debug)]
pub struct BufferRecord {
    /// `None` only in a corrupted buffer; the next round flushes it.
    pub message: Option<UrbMessage>,
    pub identifier: Identifier,
    pub delivered: bool,
    /// Processes known to hold this message.
    pub ack_set: BTreeSet<ProcessId>,
    /// Heartbeat count of each peer when the message was last sent to it.
    pub last_heartbeat: BTreeMap<ProcessId, u64>,
    /// Set on records this process broadcast itself.
    pub broadcast_at: Option<Instant>,
}

impl BufferRecord {
    pub fn new(message: UrbMessage, identifier: Identifier, ack_set: BTreeSet<ProcessId>) -> Self {
        BufferRecord {
            message: Some(message),
            identifier,
            delivered: false,
            ack_set,
            last_heartbeat: BTreeMap::new(),
            broadcast_at: None,
        }
    }

    pub fn acked_by_all(&self, trusted: &BTreeSet<ProcessId>) -> bool {
        trusted.is_subset(&self.ack_set)
    }

    /// True when `heartbeat` is ahead of what `peer` had when we last sent to it.
    pub fn heartbeat_advanced(&self, peer: ProcessId, heartbeat: u64) -> bool {
        self.last_heartbeat
            .get(&peer)
            .map_or(true, |&previous| heartbeat > previous)
    }
}

/// Unordered record collection. Lookups are linear; the window keeps it small.
///
/// `add` does not check for an existing identifier: duplicates are a
/// corruption the round detects and repairs, so the buffer must be able to
/// hold them.
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    records: Vec<BufferRecord>,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer { records: Vec::new() }
    }

    pub fn get(&self, identifier: &Identifier) -> Option<&BufferRecord> {
        self.records.iter().find(|r| r.identifier == *identifier)
    }

    pub fn get_mut(&mut self, identifier: &Identifier) -> Option<&mut BufferRecord> {
        self.records.iter_mut().find(|r| r.identifier == *identifier)
    }

    pub fn add(&mut self, record: BufferRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BufferRecord> {
        self.records.iter_mut()
    }

    pub fn retain(&mut self, keep: impl FnMut(&BufferRecord) -> bool) {
        self.records.retain(keep);
    }

    /// Highest buffered sequence number from `sender`, 0 when none is buffered.
    pub fn max_seq(&self, sender: ProcessId) -> Seq {
        self.records
            .iter()
            .filter(|r| r.identifier.sender == sender)
            .map(|r| r.identifier.seq)
            .max()
            .unwrap_or(0)
    }

    /// Sequence numbers buffered for `sender`.
    pub fn seqs_of(&self, sender: ProcessId) -> BTreeSet<Seq> {
        self.records
            .iter()
            .filter(|r| r.identifier.sender == sender)
            .map(|r| r.identifier.seq)
            .collect()
    }

    /// A record without payload, or two records with one identifier.
    pub fn is_corrupted(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.records.len());
        self.records
            .iter()
            .any(|r| r.message.is_none() || !seen.insert(r.identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sender: ProcessId, seq: Seq) -> BufferRecord {
        BufferRecord::new(
            UrbMessage::new(format!("{}-{}", sender, seq)),
            Identifier::new(sender, seq),
            BTreeSet::from([sender]),
        )
    }

    #[test]
    fn test_get_and_add() {
        let mut buffer = Buffer::new();
        buffer.add(record(0, 0));
        buffer.add(record(0, 1));
        buffer.add(record(0, 2));

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get(&Identifier::new(0, 1)).unwrap().identifier, Identifier::new(0, 1));
        assert!(buffer.get(&Identifier::new(1, 0)).is_none());
    }

    #[test]
    fn test_max_seq() {
        let mut buffer = Buffer::new();
        assert_eq!(buffer.max_seq(1), 0);

        buffer.add(record(1, 1));
        buffer.add(record(1, 2));
        buffer.add(record(2, 3));

        assert_eq!(buffer.max_seq(1), 2);
        assert_eq!(buffer.max_seq(2), 3);
    }

    #[test]
    fn test_detects_duplicates_and_missing_payloads() {
        let mut buffer = Buffer::new();
        buffer.add(record(2, 5));
        buffer.add(record(1, 5));
        assert!(!buffer.is_corrupted());

        buffer.add(record(2, 5));
        assert!(buffer.is_corrupted());

        let mut buffer = Buffer::new();
        let mut empty = record(0, 1);
        empty.message = None;
        buffer.add(empty);
        assert!(buffer.is_corrupted());
    }

    #[test]
    fn test_heartbeat_advanced() {
        let mut r = record(0, 1);
        assert!(r.heartbeat_advanced(1, 0));

        r.last_heartbeat.insert(1, 4);
        assert!(!r.heartbeat_advanced(1, 4));
        assert!(r.heartbeat_advanced(1, 5));
    }
}
