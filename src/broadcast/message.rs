use serde::{Deserialize, Serialize};

use crate::common::digest::{sha512, Digest, Hashable};

/*
    A message m broadcast by process j is named by the pair (j, s), where s
    is the number of messages j had broadcast when it issued m. Every copy of
    m that travels the network, whether forwarded by j itself or relayed by a
    third process, carries this identifier; acknowledgements and buffer
    lookups refer to m only through it.
*/

pub type ProcessId = usize;

pub type Seq = u64;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Identifier {
    pub sender: ProcessId,
    pub seq: Seq,
}

impl Identifier {
    pub fn new(sender: ProcessId, seq: Seq) -> Self {
        Identifier { sender, seq }
    }
}

/// Application payload carried by the broadcast.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct UrbMessage {
    pub text: String,
}

impl UrbMessage {
    pub fn new(text: impl Into<String>) -> Self {
        UrbMessage { text: text.into() }
    }
}

impl Hashable for UrbMessage {
    fn hash(&self) -> Digest {
        sha512(self.text.as_bytes())
    }
}

/// `APP_MSG` payload: a copy of `(originator, seq)` forwarded by the envelope sender.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AppMessage {
    pub originator: ProcessId,
    pub seq: Seq,
    pub message: UrbMessage,
}

/// `APP_ACK` payload: the envelope sender holds `(originator, seq)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AppAck {
    pub originator: ProcessId,
    pub seq: Seq,
}

/// `GOSSIP` payload, expressed from the receiver's point of view.
///
/// A sender `j` writing to `k` puts the highest sequence number it buffers
/// from `k` in `seq_estimate`, its own `rx_obsolete[k]` in `tx_estimate` (how
/// far `k`'s messages are retired at `j`) and its `tx_obsolete[k]` in
/// `rx_estimate`. The receiver merges each field with a pointwise maximum.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Gossip {
    pub seq_estimate: Seq,
    pub rx_estimate: Seq,
    pub tx_estimate: Seq,
}

/// A message that reached quorum and was handed to the application.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Delivery {
    pub identifier: Identifier,
    pub message: UrbMessage,
    pub digest: Digest,
}
