use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::broadcast::ProcessId;

/// Errors raised while turning envelopes into bytes and back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Datagram of {size} bytes exceeds maximum of {max}")]
    Oversized { size: usize, max: usize },
}

/// Errors raised by the resolver when an inbound envelope cannot be routed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unrecognized message tag {tag} from process {sender}")]
    UnknownTag { tag: u8, sender: ProcessId },

    #[error("Malformed payload: {0}")]
    Payload(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Could not read hosts file: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed line in hosts file: {0}")]
    MalformedLine(String),

    #[error("Could not parse ID {value:?}: {reason}")]
    BadId { value: String, reason: String },

    #[error("Could not parse address {0:?}")]
    BadAddress(String),

    #[error("Process {0} is listed more than once")]
    DuplicateId(ProcessId),

    #[error("Hosts file lists no processes")]
    Empty,

    #[error("Process {0} is not listed in the hosts file")]
    UnknownSelf(ProcessId),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("No address known for process {0}")]
    UnknownPeer(ProcessId),

    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Process {id} has no port: {base} + {id} does not fit in 16 bits")]
    PortOutOfRange { id: ProcessId, base: u16 },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[from] io::Error),
}
