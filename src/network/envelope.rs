//! Wire envelope and its JSON encoding.
//!
//! # Wire Format
//!
//! One UDP datagram carries one JSON object:
//!
//! ```text
//! {"tag": 0, "sender": 2, "payload": {"originator": 0, "seq": 7, "message": {"text": "hi"}}}
//! ```
//!
//! The tag is kept as a raw byte so a peer speaking a newer protocol is
//! reported as an unknown tag rather than as an unreadable datagram.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::broadcast::{AppAck, AppMessage, Gossip, ProcessId};
use crate::common::error::{CodecError, DispatchError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    AppMsg = 0,
    AppAck = 1,
    Gossip = 2,
    HbHeartbeat = 3,
    ThetaHeartbeat = 4,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::AppMsg => "APP_MSG",
            Tag::AppAck => "APP_ACK",
            Tag::Gossip => "GOSSIP",
            Tag::HbHeartbeat => "HB_HEARTBEAT",
            Tag::ThetaHeartbeat => "THETA_HEARTBEAT",
        }
    }

    /// Metrics label for a raw tag byte.
    pub fn label(raw: u8) -> &'static str {
        Tag::try_from(raw).map(|tag| tag.as_str()).unwrap_or("UNKNOWN")
    }
}

impl TryFrom<u8> for Tag {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Tag::AppMsg),
            1 => Ok(Tag::AppAck),
            2 => Ok(Tag::Gossip),
            3 => Ok(Tag::HbHeartbeat),
            4 => Ok(Tag::ThetaHeartbeat),
            other => Err(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: u8,
    pub sender: ProcessId,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new<T: Serialize>(tag: Tag, sender: ProcessId, payload: &T) -> Result<Self, CodecError> {
        match serde_json::to_value(payload).map_err(|e| CodecError::Encode(e.to_string()))? {
            Value::Object(payload) => Ok(Envelope {
                tag: tag as u8,
                sender,
                payload,
            }),
            other => Err(CodecError::Encode(format!("payload is not a map: {}", other))),
        }
    }

    pub fn heartbeat(tag: Tag, sender: ProcessId) -> Self {
        Envelope {
            tag: tag as u8,
            sender,
            payload: Map::new(),
        }
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Decoded content of an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum WireMessage {
    AppMsg(AppMessage),
    AppAck(AppAck),
    Gossip(Gossip),
    HbHeartbeat,
    ThetaHeartbeat,
}

impl WireMessage {
    pub fn tag(&self) -> Tag {
        match self {
            WireMessage::AppMsg(_) => Tag::AppMsg,
            WireMessage::AppAck(_) => Tag::AppAck,
            WireMessage::Gossip(_) => Tag::Gossip,
            WireMessage::HbHeartbeat => Tag::HbHeartbeat,
            WireMessage::ThetaHeartbeat => Tag::ThetaHeartbeat,
        }
    }

    pub fn into_envelope(self, sender: ProcessId) -> Result<Envelope, CodecError> {
        match self {
            WireMessage::AppMsg(message) => Envelope::new(Tag::AppMsg, sender, &message),
            WireMessage::AppAck(ack) => Envelope::new(Tag::AppAck, sender, &ack),
            WireMessage::Gossip(gossip) => Envelope::new(Tag::Gossip, sender, &gossip),
            WireMessage::HbHeartbeat => Ok(Envelope::heartbeat(Tag::HbHeartbeat, sender)),
            WireMessage::ThetaHeartbeat => Ok(Envelope::heartbeat(Tag::ThetaHeartbeat, sender)),
        }
    }

    pub fn open(envelope: &Envelope) -> Result<Self, DispatchError> {
        let tag = Tag::try_from(envelope.tag).map_err(|tag| DispatchError::UnknownTag {
            tag,
            sender: envelope.sender,
        })?;

        Ok(match tag {
            Tag::AppMsg => WireMessage::AppMsg(envelope.decode_payload()?),
            Tag::AppAck => WireMessage::AppAck(envelope.decode_payload()?),
            Tag::Gossip => WireMessage::Gossip(envelope.decode_payload()?),
            Tag::HbHeartbeat => WireMessage::HbHeartbeat,
            Tag::ThetaHeartbeat => WireMessage::ThetaHeartbeat,
        })
    }
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
